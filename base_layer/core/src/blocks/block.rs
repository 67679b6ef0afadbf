// Copyright 2019. The Quasar Development Community
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

use quasar_common_types::{BlockHash, Hash256, HASH_LENGTH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    codec::{ByteReader, CodecError, Decodable, Encodable},
    transactions::{Transaction, TxContext, TxType},
};

/// Block type tags. The high bit marks origin blocks, the low bit marks primary-chain blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum BlockType {
    Genesis = 0xffff,
    Origin = 0xff00,
    Primary = 0x0001,
    Subsidiary = 0x0002,
    Extended = 0x0004,
    Vacant = 0x0008,
}

impl BlockType {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0xffff => Some(BlockType::Genesis),
            0xff00 => Some(BlockType::Origin),
            0x0001 => Some(BlockType::Primary),
            0x0002 => Some(BlockType::Subsidiary),
            0x0004 => Some(BlockType::Extended),
            0x0008 => Some(BlockType::Vacant),
            _ => None,
        }
    }
}

/// A block of the multi-fork chain.
///
/// `proof` carries the consensus proof payload: a compact hash-work record for PoW blocks, the
/// stake agreement publication for DPoS blocks, a piggyback record for subsidiary-fork blocks and
/// the serialized fork profile for origin blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub version: u16,
    pub block_type: u16,
    pub timestamp: u32,
    pub hash_prev: BlockHash,
    pub hash_merkle: Hash256,
    pub proof: Vec<u8>,
    pub tx_mint: Transaction,
    pub vtx: Vec<Transaction>,
    pub sig: Vec<u8>,
}

impl Default for Block {
    fn default() -> Self {
        Self {
            version: 1,
            block_type: 0,
            timestamp: 0,
            hash_prev: Hash256::zero(),
            hash_merkle: Hash256::zero(),
            proof: Vec::new(),
            tx_mint: Transaction::default(),
            vtx: Vec::new(),
            sig: Vec::new(),
        }
    }
}

impl Block {
    pub fn is_null(&self) -> bool {
        self.block_type == 0 || self.timestamp == 0
    }

    pub fn is_genesis(&self) -> bool {
        self.block_type == BlockType::Genesis as u16
    }

    pub fn is_origin(&self) -> bool {
        (self.block_type >> 15) != 0
    }

    pub fn is_primary(&self) -> bool {
        (self.block_type & 1) != 0
    }

    pub fn is_subsidiary(&self) -> bool {
        self.block_type == BlockType::Subsidiary as u16
    }

    pub fn is_extended(&self) -> bool {
        self.block_type == BlockType::Extended as u16
    }

    pub fn is_vacant(&self) -> bool {
        self.block_type == BlockType::Vacant as u16
    }

    pub fn is_proof_of_work(&self) -> bool {
        self.tx_mint.tx_type == TxType::MintWork as u16
    }

    /// Height is derived from the height coded into `hash_prev`; extended blocks do not increment
    /// the fork height.
    pub fn get_block_height(&self) -> u32 {
        if self.is_genesis() {
            0
        } else if self.is_extended() {
            self.hash_prev.height()
        } else {
            self.hash_prev.height() + 1
        }
    }

    /// The block id: the hash of the header fields and mint tx, with the high 32 bits replaced by
    /// the block height.
    pub fn get_hash(&self) -> BlockHash {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.encode_id_fields(&mut buf);
        let digest = Sha256::digest(&buf);
        let mut hash = [0u8; HASH_LENGTH];
        hash.copy_from_slice(digest.as_slice());
        Hash256(hash).with_height(self.get_block_height())
    }

    fn encode_id_fields(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.version.encode_into(buf)?;
        self.block_type.encode_into(buf)?;
        self.timestamp.encode_into(buf)?;
        self.hash_prev.encode_into(buf)?;
        self.hash_merkle.encode_into(buf)?;
        self.proof.encode_into(buf)?;
        self.tx_mint.encode_into(buf)
    }

    /// The bytes a PoW miner hashes: everything that is fixed when mining starts.
    pub fn serialized_proof_of_work_data(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = self.version.encode_into(&mut buf);
        let _ = self.block_type.encode_into(&mut buf);
        let _ = self.timestamp.encode_into(&mut buf);
        let _ = self.hash_prev.encode_into(&mut buf);
        let _ = self.proof.encode_into(&mut buf);
        buf
    }

    /// The random-beacon contribution of this block. Proof-less placeholders take theirs from the
    /// previous block hash.
    pub fn get_block_beacon(&self) -> u64 {
        if self.proof.is_empty() {
            let bytes = &self.hash_prev.as_bytes()[HASH_LENGTH - 8..];
            let mut le = [0u8; 8];
            le.copy_from_slice(bytes);
            return u64::from_le_bytes(le);
        }
        0
    }

    /// Net coinage this block mints: the mint output minus the fees it collects.
    pub fn get_block_mint(&self) -> i64 {
        let total_fee: i64 = self.vtx.iter().map(|tx| tx.tx_fee).sum();
        self.tx_mint.amount - total_fee
    }

    /// Pairwise merkle root over the ids of `vtx`; an odd tail is paired with itself. An empty
    /// block has a zero root.
    pub fn calc_merkle_root(&self) -> Hash256 {
        let mut layer: Vec<Hash256> = self.vtx.iter().map(|tx| tx.get_hash()).collect();
        if layer.is_empty() {
            return Hash256::zero();
        }
        while layer.len() > 1 {
            let mut next = Vec::with_capacity((layer.len() + 1) / 2);
            for pair in layer.chunks(2) {
                let left = pair[0];
                let right = *pair.last().unwrap_or(&left);
                let mut hasher = Sha256::new();
                hasher.update(left.as_bytes());
                hasher.update(right.as_bytes());
                let digest = hasher.finalize();
                let mut hash = [0u8; HASH_LENGTH];
                hash.copy_from_slice(digest.as_slice());
                next.push(Hash256(hash));
            }
            layer = next;
        }
        layer[0]
    }
}

impl Encodable for Block {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.encode_id_fields(buf)?;
        self.vtx.encode_into(buf)?;
        self.sig.encode_into(buf)
    }
}

impl Decodable for Block {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: reader.read_u16()?,
            block_type: reader.read_u16()?,
            timestamp: reader.read_u32()?,
            hash_prev: reader.read_hash()?,
            hash_merkle: reader.read_hash()?,
            proof: reader.read_var_bytes()?,
            tx_mint: Transaction::decode_from(reader)?,
            vtx: Vec::<Transaction>::decode_from(reader)?,
            sig: reader.read_var_bytes()?,
        })
    }
}

/// A block together with the recorded input context of each of its transactions, which is what
/// storage persists and fork-switch updates carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockEx {
    pub block: Block,
    pub tx_contexts: Vec<TxContext>,
}

impl BlockEx {
    pub fn new(block: Block, tx_contexts: Vec<TxContext>) -> Self {
        Self { block, tx_contexts }
    }

    pub fn from_block(block: Block) -> Self {
        Self {
            block,
            tx_contexts: Vec::new(),
        }
    }
}

impl Encodable for BlockEx {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.block.encode_into(buf)?;
        self.tx_contexts.encode_into(buf)
    }
}

impl Decodable for BlockEx {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            block: Block::decode_from(reader)?,
            tx_contexts: Vec::<TxContext>::decode_from(reader)?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transactions::Destination;

    fn tx_with_amount(amount: i64) -> Transaction {
        Transaction {
            timestamp: 100,
            send_to: Destination::PubKey([amount as u8; 32]),
            amount,
            tx_fee: 1,
            ..Default::default()
        }
    }

    fn sample_block() -> Block {
        let mut block = Block {
            block_type: BlockType::Primary as u16,
            timestamp: 1_600_000_060,
            hash_prev: Hash256([2u8; 32]).with_height(41),
            proof: vec![1, 24, 0, 0, 0, 0, 0, 0, 0, 0],
            tx_mint: Transaction {
                tx_type: TxType::MintWork as u16,
                timestamp: 1_600_000_060,
                amount: 500,
                send_to: Destination::PubKey([1u8; 32]),
                ..Default::default()
            },
            vtx: vec![tx_with_amount(10), tx_with_amount(20), tx_with_amount(30)],
            ..Default::default()
        };
        block.hash_merkle = block.calc_merkle_root();
        block
    }

    #[test]
    fn codec_round_trip() {
        let block = sample_block();
        assert_eq!(Block::decode(&block.encoded()).unwrap(), block);

        let blockex = BlockEx::new(block, vec![TxContext::default()]);
        assert_eq!(BlockEx::decode(&blockex.encoded()).unwrap(), blockex);
    }

    #[test]
    fn hash_encodes_height() {
        let block = sample_block();
        assert_eq!(block.get_block_height(), 42);
        assert_eq!(block.get_hash().height(), 42);
    }

    #[test]
    fn extended_blocks_keep_prev_height() {
        let mut block = sample_block();
        block.block_type = BlockType::Extended as u16;
        assert_eq!(block.get_block_height(), 41);
    }

    #[test]
    fn merkle_root_duplicates_odd_tail() {
        let mut block = sample_block();
        block.vtx.truncate(3);
        let root3 = block.calc_merkle_root();
        // duplicating the last tx explicitly must give the same root
        block.vtx.push(block.vtx[2].clone());
        assert_eq!(block.calc_merkle_root(), root3);

        block.vtx.clear();
        assert!(block.calc_merkle_root().is_zero());
    }

    #[test]
    fn block_mint_subtracts_fees() {
        let block = sample_block();
        assert_eq!(block.get_block_mint(), 500 - 3);
    }

    #[test]
    fn type_predicates() {
        let mut block = sample_block();
        assert!(block.is_primary() && !block.is_origin() && !block.is_vacant());
        block.block_type = BlockType::Genesis as u16;
        assert!(block.is_genesis() && block.is_origin() && block.is_primary());
        block.block_type = BlockType::Origin as u16;
        assert!(block.is_origin() && !block.is_primary());
    }
}
