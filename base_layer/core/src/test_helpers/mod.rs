// Copyright 2020. The Quasar Development Community
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! Helpers for building valid chains in tests: a pre-wired in-memory chain, deterministic keys
//! and block/transaction builders that produce consensus-valid artifacts.

use std::{
    path::PathBuf,
    sync::atomic::{AtomicU64, Ordering},
};

use ed25519_dalek::{Signer, SigningKey};
use quasar_common_types::BlockHash;
use quasar_storage::MemoryKeyValStore;
use sha2::Digest;

use crate::{
    blocks::{Block, BlockType},
    chain::BlockChain,
    codec::Encodable,
    config::BlockchainConfig,
    consensus::{ConsensusConstants, ConsensusConstantsBuilder, Network},
    error::ChainError,
    proof_of_work::{target_from_bits, HashWorkProof, PowAlgorithm},
    transactions::{Destination, Transaction, TxIn, TxOutPoint, TxType},
    validation::BlockIndexLookup,
};

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// A unique throwaway data directory under the system temp dir.
pub fn create_temporary_data_path() -> PathBuf {
    let id = TEMP_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("quasar_test_{}_{id}", std::process::id()))
}

/// A deterministic signing key for test fixtures.
pub fn test_key(seed: u8) -> SigningKey {
    SigningKey::from_bytes(&[seed; 32])
}

pub fn dest_of(key: &SigningKey) -> Destination {
    Destination::PubKey(key.verifying_key().to_bytes())
}

/// A fully wired in-memory chain on the local test network. The genesis supply is owned by
/// `genesis_key`, so tests can spend from it directly.
pub struct TestChain {
    pub chain: BlockChain<MemoryKeyValStore>,
    pub genesis_key: SigningKey,
    pub genesis_hash: BlockHash,
    path: PathBuf,
}

impl Drop for TestChain {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub fn create_new_blockchain() -> TestChain {
    let genesis_key = test_key(0x20);
    let constants = ConsensusConstantsBuilder::new(Network::LocalTest)
        .with_genesis_owner(genesis_key.verifying_key().to_bytes())
        .build();
    create_blockchain_with_constants(constants, genesis_key)
}

pub fn create_blockchain_with_constants(
    constants: ConsensusConstants,
    genesis_key: SigningKey,
) -> TestChain {
    let path = create_temporary_data_path();
    let config = BlockchainConfig {
        path_data: path.clone(),
        f_debug: true,
        ..Default::default()
    };
    let chain = BlockChain::new(MemoryKeyValStore::new(), constants, &config)
        .expect("failed to create test chain");
    let genesis_hash = *chain.genesis_block_hash();
    TestChain {
        chain,
        genesis_key,
        genesis_hash,
        path,
    }
}

/// Build and sign a transfer spending `prevouts` (all owned by `owner`).
pub fn create_transfer(
    owner: &SigningKey,
    prevouts: Vec<TxOutPoint>,
    send_to: Destination,
    amount: i64,
    tx_fee: i64,
    timestamp: u32,
) -> Transaction {
    let mut tx = Transaction {
        version: 1,
        tx_type: TxType::Token as u16,
        timestamp,
        inputs: prevouts.into_iter().map(|prevout| TxIn { prevout }).collect(),
        send_to,
        amount,
        tx_fee,
        ..Default::default()
    };
    tx.sig_data = owner.sign(&tx.signing_bytes()).to_bytes().to_vec();
    tx
}

/// Build and sign a delegate enrollment (CERT) transaction anchored at `anchor`.
pub fn create_cert_tx(
    owner: &SigningKey,
    prevout: TxOutPoint,
    delegate: Destination,
    amount: i64,
    tx_fee: i64,
    anchor: BlockHash,
    timestamp: u32,
) -> Transaction {
    let mut tx = Transaction {
        version: 1,
        tx_type: TxType::Cert as u16,
        timestamp,
        hash_anchor: anchor,
        inputs: vec![TxIn { prevout }],
        send_to: delegate,
        amount,
        tx_fee,
        data: vec![0xde; 16],
        ..Default::default()
    };
    tx.sig_data = owner.sign(&tx.signing_bytes()).to_bytes().to_vec();
    tx
}

/// Mine a valid primary PoW block on `prev_hash` carrying `transactions`, minting to `miner`.
///
/// The nonce search runs against the live required bits, so the block passes both the target and
/// the timestamp discipline of the local test network.
pub fn mine_block(
    test_chain: &TestChain,
    prev_hash: &BlockHash,
    miner: &SigningKey,
    transactions: Vec<Transaction>,
) -> Result<Block, ChainError> {
    let chain = &test_chain.chain;
    let prev = chain
        .container()
        .get_block_index(prev_hash)
        .ok_or(ChainError::NotFound)?;
    let (bits, reward) = chain.get_proof_of_work_target(prev_hash, PowAlgorithm::Sha256d)?;

    let total_fee: i64 = transactions.iter().map(|tx| tx.tx_fee).sum();
    let timestamp = prev.timestamp + chain.protocol().constants().pow_spacing;

    let tx_mint = Transaction {
        version: 1,
        tx_type: TxType::MintWork as u16,
        timestamp,
        send_to: dest_of(miner),
        amount: reward + total_fee,
        ..Default::default()
    };

    let mut block = Block {
        version: 1,
        block_type: BlockType::Primary as u16,
        timestamp,
        hash_prev: *prev_hash,
        tx_mint,
        vtx: transactions,
        ..Default::default()
    };
    block.hash_merkle = block.calc_merkle_root();

    // search a nonce satisfying the target
    let target = target_from_bits(bits);
    for nonce in 0u64.. {
        block.proof = HashWorkProof { algo: 1, bits, nonce }.encoded();
        let digest = sha2::Sha256::digest(block.serialized_proof_of_work_data());
        let hash = primitive_types::U256::from_big_endian(digest.as_slice());
        if hash <= target {
            break;
        }
    }

    block.sig = miner.sign(block.get_hash().as_bytes()).to_bytes().to_vec();
    Ok(block)
}

/// Mine and ingest `count` empty blocks on the genesis fork, returning them in order.
pub fn add_many_chained_blocks(
    test_chain: &TestChain,
    count: usize,
    miner: &SigningKey,
) -> Result<Vec<Block>, ChainError> {
    let fork = test_chain.genesis_hash;
    let mut prev = test_chain
        .chain
        .get_last_block(&fork)?
        .ok_or(ChainError::NotFound)?
        .0;
    let mut blocks = Vec::with_capacity(count);
    for _ in 0..count {
        let block = mine_block(test_chain, &prev, miner, Vec::new())?;
        prev = block.get_hash();
        test_chain.chain.add_new_block(&block)?;
        blocks.push(block);
    }
    Ok(blocks)
}
