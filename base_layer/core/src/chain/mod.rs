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

//! The top-level block-chain controller: block and origin ingest, fork-context registration,
//! delegate enrollment/agreement caching and the DeFi reward surface. All ingest operations on
//! one fork are serialized behind that fork's lock.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex},
};

use log::{debug, info};
use lru_cache::LruCache;
use quasar_common_types::{BlockHash, ForkId, TxId};
use quasar_storage::KeyValStore;

use crate::{
    blocks::{Block, BlockEx, BlockIndex},
    chain_storage::{BlockContainer, BlockView, ForkStatus},
    codec::Decodable,
    config::BlockchainConfig,
    consensus::ConsensusConstants,
    defi::{DeFiForkReward, DeFiRewardSet, RelationGraph},
    delegates::{
        get_delegated_ballot,
        DelegateAgreement,
        DelegateEnrolled,
        DelegateVerifier,
        ProofVerifier,
    },
    error::ChainError,
    forks::{ForkContext, ForkProfile},
    proof_of_work::PiggybackProof,
    transactions::{Destination, Transaction, TxContext, TxInContext},
    validation::CoreProtocol,
};

const LOG_TARGET: &str = "c::bc::block_chain";

const ENROLLED_CACHE_COUNT: usize = 120;
const AGREEMENT_CACHE_COUNT: usize = 16;

/// Notification of a committed chain advance on one fork: the new tip, the transactions whose
/// state changed and the block lists of the reorganization (empty removals for a plain extend).
#[derive(Debug, Clone, Default)]
pub struct BlockChainUpdate {
    pub fork: ForkId,
    pub parent: ForkId,
    pub origin_height: i64,
    pub last_block: BlockHash,
    pub last_block_time: u32,
    pub last_block_height: u32,
    pub money_supply: i64,
    pub tx_update: HashSet<TxId>,
    pub block_add_new: Vec<BlockEx>,
    pub block_remove: Vec<BlockEx>,
}

impl BlockChainUpdate {
    fn from_index(index: &BlockIndex, parent: ForkId) -> Self {
        Self {
            fork: index.hash_origin,
            parent,
            origin_height: i64::from(index.hash_origin.height()) - 1,
            last_block: index.hash,
            last_block_time: index.timestamp,
            last_block_height: index.height,
            money_supply: index.money_supply,
            tx_update: HashSet::new(),
            block_add_new: Vec::new(),
            block_remove: Vec::new(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.fork.is_zero()
    }
}

/// The consensus and chain-state controller.
pub struct BlockChain<S: KeyValStore> {
    protocol: CoreProtocol,
    container: BlockContainer<S>,
    cache_enrolled: Mutex<LruCache<BlockHash, DelegateEnrolled>>,
    cache_agreement: Mutex<LruCache<BlockHash, DelegateAgreement>>,
    fork_locks: Mutex<HashMap<ForkId, Arc<Mutex<()>>>>,
    defi_reward: Mutex<DeFiForkReward>,
}

impl<S: KeyValStore> BlockChain<S> {
    /// Open the chain over `store`, verifying the container and inserting the genesis block into
    /// an empty one.
    pub fn new(store: S, constants: ConsensusConstants, config: &BlockchainConfig) -> Result<Self, ChainError> {
        let protocol = CoreProtocol::new(constants);
        let container = BlockContainer::new(store, &config.path_data, config.f_debug)?;
        let chain = Self {
            protocol,
            container,
            cache_enrolled: Mutex::new(LruCache::new(ENROLLED_CACHE_COUNT)),
            cache_agreement: Mutex::new(LruCache::new(AGREEMENT_CACHE_COUNT)),
            fork_locks: Mutex::new(HashMap::new()),
            defi_reward: Mutex::new(DeFiForkReward::new()),
        };

        if !chain.container.is_empty()? {
            if !chain.container.exists(chain.protocol.genesis_block_hash())? {
                return Err(ChainError::StorageError(
                    "container does not hold this network's genesis block".into(),
                ));
            }
            if !chain
                .container
                .check_consistency(config.check_level, config.check_depth)?
            {
                return Err(ChainError::StorageError(
                    "block container failed the startup consistency check".into(),
                ));
            }
        }
        if chain.container.is_empty()? {
            let genesis = chain.protocol.get_genesis_block();
            chain.insert_genesis_block(&genesis)?;
            info!(
                target: LOG_TARGET,
                "Inserted genesis block {}",
                genesis.get_hash()
            );
        }

        // re-register DeFi forks with the reward engine
        for ctxt in chain.container.list_fork_contexts()? {
            if ctxt.profile.is_defi() {
                chain
                    .defi_lock()?
                    .add_fork(ctxt.fork_id, ctxt.profile.clone());
            }
        }
        Ok(chain)
    }

    pub fn protocol(&self) -> &CoreProtocol {
        &self.protocol
    }

    pub fn container(&self) -> &BlockContainer<S> {
        &self.container
    }

    pub fn genesis_block_hash(&self) -> &BlockHash {
        self.protocol.genesis_block_hash()
    }

    fn insert_genesis_block(&self, block: &Block) -> Result<(), ChainError> {
        let trust = self.protocol.get_block_trust(block);
        self.container.initiate(&block.get_hash(), block, trust)
    }

    fn fork_lock(&self, fork: &ForkId) -> Result<Arc<Mutex<()>>, ChainError> {
        let mut locks = self
            .fork_locks
            .lock()
            .map_err(|_| ChainError::StorageError("fork lock table poisoned".into()))?;
        Ok(locks.entry(*fork).or_default().clone())
    }

    fn defi_lock(&self) -> Result<std::sync::MutexGuard<'_, DeFiForkReward>, ChainError> {
        self.defi_reward
            .lock()
            .map_err(|_| ChainError::StorageError("defi engine lock poisoned".into()))
    }

    // ---- read API ----------------------------------------------------------------

    pub fn get_fork_status(&self) -> Result<Vec<ForkStatus>, ChainError> {
        self.container.list_forks()
    }

    pub fn get_fork_profile(&self, fork: &ForkId) -> Result<Option<ForkProfile>, ChainError> {
        self.container.retrieve_profile(fork)
    }

    pub fn get_fork_context(&self, fork: &ForkId) -> Result<Option<ForkContext>, ChainError> {
        self.container.retrieve_fork_context(fork)
    }

    pub fn list_fork_context(&self) -> Result<Vec<ForkContext>, ChainError> {
        self.container.list_fork_contexts()
    }

    pub fn get_block_count(&self, fork: &ForkId) -> Result<usize, ChainError> {
        self.container.get_block_count(fork)
    }

    pub fn get_block_location(&self, hash: &BlockHash) -> Result<Option<(ForkId, u32)>, ChainError> {
        Ok(self
            .container
            .retrieve_index(hash)?
            .map(|index| (index.hash_origin, index.height)))
    }

    pub fn get_block_hash(&self, fork: &ForkId, height: u32) -> Result<Option<BlockHash>, ChainError> {
        self.container.get_block_hash(fork, height)
    }

    /// The current tip of a fork as `(hash, height, timestamp)`.
    pub fn get_last_block(&self, fork: &ForkId) -> Result<Option<(BlockHash, u32, u32)>, ChainError> {
        Ok(self
            .container
            .retrieve_fork(fork)?
            .map(|index| (index.hash, index.height, index.timestamp)))
    }

    pub fn get_block(&self, hash: &BlockHash) -> Result<Block, ChainError> {
        self.container.retrieve(hash)
    }

    pub fn get_block_ex(&self, hash: &BlockHash) -> Result<BlockEx, ChainError> {
        self.container.retrieve_ex(hash)
    }

    pub fn get_origin(&self, fork: &ForkId) -> Result<Block, ChainError> {
        self.container.retrieve_origin(fork)
    }

    pub fn exists(&self, hash: &BlockHash) -> Result<bool, ChainError> {
        self.container.exists(hash)
    }

    pub fn get_transaction(&self, fork: &ForkId, txid: &TxId) -> Result<Option<Transaction>, ChainError> {
        self.container.retrieve_tx(fork, txid)
    }

    /// The mint reward of the block following `prev`: the primary work schedule on the primary
    /// fork, the profile's (optionally halving) reward elsewhere.
    pub fn get_block_mint_reward(&self, prev_hash: &BlockHash) -> Result<i64, ChainError> {
        let prev = self
            .container
            .retrieve_index(prev_hash)?
            .ok_or(ChainError::NotFound)?;
        self.mint_reward_for(&prev)
    }

    fn mint_reward_for(&self, prev: &BlockIndex) -> Result<i64, ChainError> {
        if prev.is_primary() {
            return Ok(self.protocol.get_primary_mint_work_reward(prev));
        }
        let profile = self
            .container
            .retrieve_profile(&prev.hash_origin)?
            .ok_or(ChainError::NotFound)?;
        if profile.halve_cycle == 0 {
            return Ok(profile.mint_reward);
        }
        let joint = profile.joint_height.max(0) as u32;
        let halvings = (prev.height + 1).saturating_sub(joint) / profile.halve_cycle;
        if halvings >= 63 {
            return Ok(0);
        }
        Ok(profile.mint_reward >> halvings)
    }

    /// `(required bits, reward)` for mining on top of `prev_hash`.
    pub fn get_proof_of_work_target(
        &self,
        prev_hash: &BlockHash,
        algo: crate::proof_of_work::PowAlgorithm,
    ) -> Result<(u8, i64), ChainError> {
        let prev = self
            .container
            .retrieve_index(prev_hash)?
            .ok_or(ChainError::NotFound)?;
        if !prev.is_primary() {
            return Err(ChainError::BlockInvalidFork);
        }
        Ok(self.protocol.get_proof_of_work_target(&prev, algo, &self.container))
    }

    // ---- ingest API --------------------------------------------------------------

    /// Register the fork context carried by a fork-creation transaction: the transaction data
    /// embeds the new fork's origin block, whose proof in turn carries the profile.
    pub fn add_new_fork_context(&self, tx_fork: &Transaction) -> Result<ForkContext, ChainError> {
        let txid = tx_fork.get_hash();
        let block = Block::decode(&tx_fork.data).map_err(|_| ChainError::BlockInvalidFork)?;
        if !block.is_origin() || block.is_primary() {
            info!(target: LOG_TARGET, "Invalid origin block found in tx {txid}");
            return Err(ChainError::BlockInvalidFork);
        }
        let profile = ForkProfile::load(&block.proof).map_err(|_| ChainError::BlockInvalidFork)?;
        let fork_id = block.get_hash();

        let genesis_lock = self.fork_lock(self.protocol.genesis_block_hash())?;
        let _guard = genesis_lock
            .lock()
            .map_err(|_| ChainError::StorageError("fork lock poisoned".into()))?;

        let parent_ctxt = self
            .container
            .retrieve_fork_context(&profile.parent)?
            .ok_or_else(|| {
                info!(
                    target: LOG_TARGET,
                    "AddNewForkContext retrieve parent context error: {}", profile.parent
                );
                ChainError::MissingPrev
            })?;

        self.protocol.validate_origin(&block, &parent_ctxt.profile)?;

        let ctxt = ForkContext::new(fork_id, block.hash_prev, txid, profile);
        self.container.add_new_fork_context(&ctxt).map_err(|err| {
            info!(target: LOG_TARGET, "AddNewForkContext {fork_id}: {}", err.code());
            err
        })?;
        if ctxt.profile.is_defi() {
            self.defi_lock()?.add_fork(fork_id, ctxt.profile.clone());
        }
        Ok(ctxt)
    }

    /// Ingest a non-origin block. Returns the committed update; a stored side-chain block yields
    /// an empty update.
    pub fn add_new_block(&self, block: &Block) -> Result<BlockChainUpdate, ChainError> {
        let hash = block.get_hash();
        if self.container.exists(&hash)? {
            debug!(target: LOG_TARGET, "AddNewBlock already exists: {hash}");
            return Err(ChainError::AlreadyHave);
        }

        self.protocol.validate_block(block).map_err(|err| {
            info!(target: LOG_TARGET, "AddNewBlock validate error ({}): {hash}", err.code());
            err
        })?;

        let prev_index = self
            .container
            .retrieve_index(&block.hash_prev)?
            .ok_or_else(|| ChainError::StorageError(format!("prev index missing: {}", block.hash_prev)))?;

        let fork_id = prev_index.hash_origin;
        let lock = self.fork_lock(&fork_id)?;
        let _guard = lock
            .lock()
            .map_err(|_| ChainError::StorageError("fork lock poisoned".into()))?;

        let (reward, _agreement, _ref_index) = self.verify_block(&hash, block, &prev_index)?;

        let mut view = self.container.get_block_view(&block.hash_prev, true)?;

        if !block.is_vacant() {
            let mint = &block.tx_mint;
            view.add_tx(&self.container, mint.get_hash(), mint, &Destination::Null, 0)?;
        }

        let fork_height = if block.is_extended() {
            prev_index.height
        } else {
            prev_index.height + 1
        };

        let mut tx_contexts = Vec::with_capacity(block.vtx.len());
        let mut total_fee = 0i64;
        for tx in &block.vtx {
            let txid = tx.get_hash();
            let ctxt = self.get_tx_context(&view, tx).map_err(|err| {
                info!(target: LOG_TARGET, "AddNewBlock tx context error ({}): {txid}", err.code());
                err
            })?;
            self.protocol
                .verify_block_tx(tx, &ctxt, &prev_index, fork_height, &fork_id)
                .map_err(|err| {
                    info!(target: LOG_TARGET, "AddNewBlock verify tx error ({}): {txid}", err.code());
                    err
                })?;
            view.add_tx(&self.container, txid, tx, &ctxt.dest_in, ctxt.get_value_in())?;
            total_fee += tx.tx_fee;
            tx_contexts.push(ctxt);
        }

        if block.tx_mint.amount > total_fee + reward {
            info!(
                target: LOG_TARGET,
                "AddNewBlock mint amount invalid: {} > {} + {}", block.tx_mint.amount, total_fee, reward
            );
            return Err(ChainError::BlockTransactionsInvalid);
        }

        let block_trust = self.protocol.get_block_trust(block);
        let blockex = BlockEx::new(block.clone(), tx_contexts);
        let new_index = self.container.add_new(hash, &blockex, block_trust)?;
        debug!(
            target: LOG_TARGET,
            "AddNew block: {hash} height {} trust {}", new_index.height, new_index.chain_trust
        );

        if let Some(fork_last) = self.container.retrieve_fork(&fork_id)? {
            let keeps_tip = fork_last.chain_trust > new_index.chain_trust
                || (fork_last.chain_trust == new_index.chain_trust
                    && !self.container.is_equivalent(&hash, &fork_last.hash)?);
            if keeps_tip {
                info!(
                    target: LOG_TARGET,
                    "AddNew block: short chain, height {}, fork tip {}", new_index.height, fork_last.hash
                );
                return Ok(BlockChainUpdate::default());
            }
        }

        view.add_block(hash, blockex);
        self.container.commit_block_view(&view, &hash)?;

        let mut update = BlockChainUpdate::from_index(&new_index, self.fork_parent(&fork_id)?);
        update.tx_update = view.get_tx_updated();
        let (added, removed) = view.get_block_changes();
        update.block_add_new = added.iter().map(|(_, b)| b.clone()).collect();
        update.block_remove = removed.iter().map(|(_, b)| b.clone()).collect();

        if !update.block_remove.is_empty() {
            info!(
                target: LOG_TARGET,
                "Chain rollback occurred at height {}: {} added, {} removed",
                new_index.height,
                update.block_add_new.len(),
                update.block_remove.len()
            );
        }
        Ok(update)
    }

    fn fork_parent(&self, fork_id: &ForkId) -> Result<ForkId, ChainError> {
        let origin = self
            .container
            .retrieve_index(fork_id)?
            .ok_or(ChainError::NotFound)?;
        if origin.hash_prev.is_zero() {
            return Ok(ForkId::zero());
        }
        Ok(self
            .container
            .retrieve_index(&origin.hash_prev)?
            .map(|prev| prev.hash_origin)
            .unwrap_or_default())
    }

    /// Ingest the origin block of a new fork.
    pub fn add_new_origin(&self, block: &Block) -> Result<BlockChainUpdate, ChainError> {
        let hash = block.get_hash();
        if self.container.exists(&hash)? {
            debug!(target: LOG_TARGET, "AddNewOrigin already exists: {hash}");
            return Err(ChainError::AlreadyHave);
        }
        self.protocol.validate_block(block)?;

        let prev_index = self
            .container
            .retrieve_index(&block.hash_prev)?
            .ok_or_else(|| ChainError::StorageError(format!("prev index missing: {}", block.hash_prev)))?;
        let parent_profile = self
            .container
            .retrieve_profile(&prev_index.hash_origin)?
            .ok_or_else(|| ChainError::StorageError("parent profile missing".into()))?;

        let profile = self.protocol.validate_origin(block, &parent_profile)?;

        if let Some(existing) = self.container.retrieve_fork_by_name(&profile.name)? {
            info!(
                target: LOG_TARGET,
                "AddNewOrigin duplicated fork name '{}', existing fork {existing}", profile.name
            );
            return Err(ChainError::AlreadyHave);
        }

        let genesis_lock = self.fork_lock(self.protocol.genesis_block_hash())?;
        let _genesis_guard = genesis_lock
            .lock()
            .map_err(|_| ChainError::StorageError("fork lock poisoned".into()))?;

        let mut view = if profile.is_isolated() {
            self.container.get_new_fork_view(&hash)
        } else {
            self.container.get_block_view(&block.hash_prev, false)?
        };

        if block.tx_mint.amount != 0 {
            let mint = &block.tx_mint;
            view.add_tx(&self.container, mint.get_hash(), mint, &Destination::Null, 0)?;
        }

        let block_trust = self.protocol.get_block_trust(block);
        let blockex = BlockEx::from_block(block.clone());
        let new_index = self.container.add_new(hash, &blockex, block_trust)?;
        info!(target: LOG_TARGET, "AddNew origin block: {hash}");

        view.add_block(hash, blockex.clone());
        self.container.commit_block_view(&view, &hash)?;

        if profile.is_defi() {
            self.defi_lock()?.add_fork(hash, profile);
        }

        let mut update = BlockChainUpdate::from_index(&new_index, prev_index.hash_origin);
        update.tx_update = view.get_tx_updated();
        update.block_add_new.push(blockex);
        Ok(update)
    }

    /// Resolve every input of `tx` in the view; all inputs must resolve to one owner.
    fn get_tx_context(&self, view: &BlockView, tx: &Transaction) -> Result<TxContext, ChainError> {
        let mut ctxt = TxContext::default();
        for input in &tx.inputs {
            let output = view
                .retrieve_unspent(&self.container, &input.prevout)?
                .ok_or(ChainError::TransactionInputInvalid)?;
            if ctxt.dest_in.is_null() {
                ctxt.dest_in = output.dest_to.clone();
            } else if ctxt.dest_in != output.dest_to {
                return Err(ChainError::TransactionInvalid);
            }
            ctxt.inputs.push(TxInContext::from(&output));
        }
        Ok(ctxt)
    }

    // ---- block verification ------------------------------------------------------

    /// Type dispatch of the stateful block checks: agreement extraction, reward derivation, CERT
    /// window enforcement and the PoW/DPoS/subsidiary verification.
    fn verify_block(
        &self,
        hash: &BlockHash,
        block: &Block,
        prev_index: &BlockIndex,
    ) -> Result<(i64, DelegateAgreement, Option<BlockIndex>), ChainError> {
        if block.is_origin() {
            return Err(ChainError::BlockInvalidFork);
        }

        if block.is_primary() {
            if !prev_index.is_primary() {
                return Err(ChainError::BlockInvalidFork);
            }
            if !self.verify_block_cert_tx(block)? {
                return Err(ChainError::BlockCertTxOutOfBound);
            }
            let agreement = self.get_candidate_agreement(hash, block, prev_index)?;
            let reward = self
                .mint_reward_for(prev_index)
                .map_err(|_| ChainError::BlockCoinbaseInvalid)?;
            if agreement.is_proof_of_work() {
                self.protocol
                    .verify_proof_of_work(block, prev_index, &self.container)?;
            } else {
                self.protocol
                    .verify_delegated_proof_of_stake(block, prev_index, &agreement)?;
            }
            return Ok((reward, agreement, None));
        }

        if !block.is_vacant() {
            if prev_index.is_primary() {
                return Err(ChainError::BlockInvalidFork);
            }
            let proof =
                PiggybackProof::load(&block.proof).map_err(|_| ChainError::BlockProofOfStakeInvalid)?;
            let agreement = self.get_block_delegate_agreement(&proof.ref_block)?;
            if agreement.agreement != proof.agreement
                || agreement.weight.min(u32::from(u8::MAX)) != u32::from(proof.weight)
                || agreement.is_proof_of_work()
            {
                return Err(ChainError::BlockProofOfStakeInvalid);
            }
            let ref_index = self
                .container
                .retrieve_index(&proof.ref_block)?
                .ok_or(ChainError::BlockProofOfStakeInvalid)?;

            let reward = if block.is_extended() {
                // an extended block continues the agreement of its subsidiary predecessor
                let prev_block = self.container.retrieve(&prev_index.hash)?;
                if prev_block.is_vacant() {
                    return Err(ChainError::MissingPrev);
                }
                let prev_proof = PiggybackProof::load(&prev_block.proof)
                    .map_err(|_| ChainError::BlockProofOfStakeInvalid)?;
                if proof.agreement != prev_proof.agreement || proof.weight != prev_proof.weight {
                    return Err(ChainError::BlockProofOfStakeInvalid);
                }
                0
            } else {
                self.mint_reward_for(prev_index)
                    .map_err(|_| ChainError::BlockProofOfStakeInvalid)?
            };
            self.protocol
                .verify_subsidiary(block, prev_index, &ref_index, &agreement)?;
            return Ok((reward, agreement, Some(ref_index)));
        }

        Ok((0, DelegateAgreement::default(), None))
    }

    // ---- delegate engine ---------------------------------------------------------

    /// The aggregated enrollment snapshot at block `hash` (LRU-cached).
    pub fn get_block_delegate_enrolled(&self, hash: &BlockHash) -> Result<DelegateEnrolled, ChainError> {
        if let Ok(mut cache) = self.cache_enrolled.lock() {
            if let Some(enrolled) = cache.get_mut(hash) {
                return Ok(enrolled.clone());
            }
        }

        let index = self
            .container
            .retrieve_index(hash)?
            .ok_or(ChainError::NotFound)?;
        let enroll_interval = self.protocol.constants().enroll_interval;
        if index.height < enroll_interval {
            return Ok(DelegateEnrolled::default());
        }

        let mut range = Vec::with_capacity(enroll_interval as usize);
        let mut cursor = Some(index.clone());
        for _ in 0..enroll_interval {
            let entry = cursor.ok_or(ChainError::NotFound)?;
            range.push(entry.hash);
            cursor = self.container.retrieve_index(&entry.hash_prev)?;
        }
        let cutoff = index.height - enroll_interval + 1;
        let enrolled = self.container.retrieve_avail_delegate(
            &range,
            cutoff,
            self.protocol.min_enroll_amount(),
        )?;

        if let Ok(mut cache) = self.cache_enrolled.lock() {
            cache.insert(*hash, enrolled.clone());
        }
        Ok(enrolled)
    }

    /// The agreement published by an already-stored block (LRU-cached). Blocks below the
    /// consensus interval, and PoW blocks, carry the empty (proof-of-work) agreement.
    pub fn get_block_delegate_agreement(&self, hash: &BlockHash) -> Result<DelegateAgreement, ChainError> {
        if let Ok(mut cache) = self.cache_agreement.lock() {
            if let Some(agreement) = cache.get_mut(hash) {
                return Ok(agreement.clone());
            }
        }

        let index = self
            .container
            .retrieve_index(hash)?
            .ok_or(ChainError::NotFound)?;
        if index.height < self.protocol.constants().consensus_interval() {
            return Ok(DelegateAgreement::default());
        }
        let block = self.container.retrieve(hash)?;
        let agreement = self.derive_agreement(&block, hash, index.height, 1)?;

        if let Ok(mut cache) = self.cache_agreement.lock() {
            cache.insert(*hash, agreement.clone());
        }
        Ok(agreement)
    }

    /// The agreement of a candidate block that is not stored yet, derived against its
    /// predecessor.
    fn get_candidate_agreement(
        &self,
        hash: &BlockHash,
        block: &Block,
        prev_index: &BlockIndex,
    ) -> Result<DelegateAgreement, ChainError> {
        if prev_index.height + 1 < self.protocol.constants().consensus_interval() {
            return Ok(DelegateAgreement::default());
        }
        let agreement = self.derive_agreement(block, &prev_index.hash, prev_index.height + 1, 0)?;
        if let Ok(mut cache) = self.cache_agreement.lock() {
            cache.insert(*hash, agreement.clone());
        }
        Ok(agreement)
    }

    /// Shared agreement derivation: walk back to the enrollment cutoff, load the snapshot, run
    /// the proof verifier and derive the ordered ballot.
    fn derive_agreement(
        &self,
        block: &Block,
        walk_from: &BlockHash,
        target_height: u32,
        extra_steps: u32,
    ) -> Result<DelegateAgreement, ChainError> {
        if block.is_proof_of_work() {
            return Ok(DelegateAgreement::default());
        }

        let distribute = self.protocol.constants().distribute_interval;
        let cutoff = self
            .container
            .get_ancestor(walk_from, distribute + extra_steps)?
            .ok_or(ChainError::BlockProofOfStakeInvalid)?;

        let enrolled = self.get_block_delegate_enrolled(&cutoff.hash)?;
        let verifier = DelegateVerifier::new(&enrolled);
        let (agreement_hash, weight, map_ballot) = verifier.verify_proof(&block.proof)?;
        if map_ballot.is_empty() {
            return Ok(DelegateAgreement::default());
        }

        let ballot = get_delegated_ballot(
            &agreement_hash,
            weight,
            &map_ballot,
            &enrolled.vec_amount,
            cutoff.money_supply,
            target_height,
            self.protocol.constants().max_ballot_size,
        );
        Ok(DelegateAgreement {
            agreement: agreement_hash,
            weight,
            ballot,
        })
    }

    /// How many further CERT transactions each destination may carry in the next block, derived
    /// from the enrollment window ending at `last_hash`.
    pub fn get_delegate_cert_tx_count(
        &self,
        last_hash: &BlockHash,
    ) -> Result<BTreeMap<Destination, u32>, ChainError> {
        let last = self
            .container
            .retrieve_index(last_hash)?
            .ok_or(ChainError::NotFound)?;
        let mut counts: BTreeMap<Destination, u32> = BTreeMap::new();
        if last.height == 0 {
            return Ok(counts);
        }

        let enroll_interval = self.protocol.constants().enroll_interval;
        let min_height = (i64::from(last.height) - i64::from(enroll_interval) + 2).max(1) as u32;

        let mut cursor = Some(last.clone());
        for _ in 0..enroll_interval.saturating_sub(1) {
            let entry = match cursor {
                Some(entry) => entry,
                None => break,
            };
            for enroll in self.container.get_block_enrolls(&entry.hash)? {
                if enroll.anchor_height >= min_height {
                    *counts.entry(enroll.dest).or_default() += 1;
                }
            }
            cursor = self.container.retrieve_index(&entry.hash_prev)?;
        }

        let max_cert = (enroll_interval + 2).min(last.height);
        for count in counts.values_mut() {
            *count = max_cert.saturating_sub(*count);
        }
        Ok(counts)
    }

    /// Enforce the per-destination CERT cooldown for a candidate block.
    pub fn verify_block_cert_tx(&self, block: &Block) -> Result<bool, ChainError> {
        let mut block_certs: BTreeMap<&Destination, u32> = BTreeMap::new();
        for tx in &block.vtx {
            if tx.is_cert() {
                *block_certs.entry(&tx.send_to).or_default() += 1;
            }
        }
        if block_certs.is_empty() {
            return Ok(true);
        }
        let allowed = self.get_delegate_cert_tx_count(&block.hash_prev)?;
        for (dest, count) in block_certs {
            if let Some(remaining) = allowed.get(dest) {
                if count > *remaining {
                    info!(
                        target: LOG_TARGET,
                        "Block cert count {count} exceeds remaining {remaining} for {dest}"
                    );
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    // ---- DeFi reward surface -----------------------------------------------------

    fn ensure_defi_fork(&self, fork: &ForkId) -> Result<(), ChainError> {
        let mut engine = self.defi_lock()?;
        if engine.exist_fork(fork) {
            return Ok(());
        }
        if let Some(profile) = self.container.retrieve_profile(fork)? {
            if profile.is_defi() {
                engine.add_fork(*fork, profile);
            }
        }
        Ok(())
    }

    /// The last height of the reward cycle before `height` on `fork`, or −1.
    pub fn get_defi_prev_reward_height(&self, fork: &ForkId, height: i32) -> Result<i32, ChainError> {
        self.ensure_defi_fork(fork)?;
        Ok(self.defi_lock()?.prev_reward_height(fork, height))
    }

    /// Total coinage of the reward section ending at `hash`; −1 for unknown or non-DeFi forks.
    pub fn get_defi_section_reward(&self, fork: &ForkId, hash: &BlockHash) -> Result<i64, ChainError> {
        self.ensure_defi_fork(fork)?;
        Ok(self.defi_lock()?.get_section_reward(fork, hash))
    }

    /// The full reward distribution of the section ending at `section_end`: the stake-ranked
    /// share plus the promotion-tree share, merged per destination. Cached per fork and section.
    pub fn compute_defi_section_rewards(
        &self,
        fork: &ForkId,
        section_end: &BlockHash,
    ) -> Result<DeFiRewardSet, ChainError> {
        self.ensure_defi_fork(fork)?;
        {
            let engine = self.defi_lock()?;
            if let Some(cached) = engine.get_fork_section(fork, section_end) {
                return Ok(cached.clone());
            }
        }

        let profile = self
            .container
            .retrieve_profile(fork)?
            .ok_or(ChainError::NotFound)?;
        let defi = profile.defi.clone().ok_or(ChainError::NotFound)?;

        let total = self.get_defi_section_reward(fork, section_end)?;
        if total < 0 {
            return Err(ChainError::NotFound);
        }
        let stake_total = total / 100 * i64::from(defi.stake_reward_percent);
        let promotion_total = total / 100 * i64::from(defi.promotion_reward_percent);

        let balances = self.container.list_fork_address_amounts(fork)?;
        let mut rewards =
            DeFiForkReward::compute_stake_reward(defi.stake_min_token, stake_total, &balances);

        let relation = RelationGraph::construct(&self.container.list_fork_address_info(fork)?);
        let promotion = DeFiForkReward::compute_promotion_reward(
            promotion_total,
            &balances,
            &defi.promotion_token_times,
            &relation,
        );
        for (dest, amount) in promotion {
            *rewards.entry(dest).or_default() += amount;
        }

        self.defi_lock()?
            .add_fork_section(fork, *section_end, rewards.clone());
        Ok(rewards)
    }
}
