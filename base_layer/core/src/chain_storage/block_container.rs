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

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
    sync::{Mutex, RwLock},
};

use log::{error, warn};
use quasar_common_types::{BlockHash, ChainTrust, ForkId, Hash256, TxId};
use quasar_storage::{IterationResult, KeyValStore, WriteBatch};

use crate::{
    blocks::{Block, BlockEx, BlockIndex, BlockIndexArena, BlockOutline, IndexHandle},
    chain_storage::{
        block_file::BlockFile,
        block_view::{BlockView, UnspentReader},
        db,
        db::{AddrInfo, DelegateBlockRecord, EnrollEntry, TxIndexRecord},
    },
    codec::{Decodable, Encodable},
    delegates::DelegateEnrolled,
    error::ChainError,
    forks::{ForkContext, ForkProfile},
    transactions::{Destination, Transaction, TxOut, TxOutPoint},
};

const LOG_TARGET: &str = "c::cs::block_container";

/// Snapshot of one fork's tip, produced for callers enumerating active forks.
#[derive(Debug, Clone)]
pub struct ForkStatus {
    pub fork_id: ForkId,
    pub parent_id: ForkId,
    pub name: String,
    pub origin_height: u32,
    pub last_block: BlockHash,
    pub last_height: u32,
    pub last_time: u32,
    pub money_supply: i64,
}

struct ForkState {
    profile: ForkProfile,
    origin: IndexHandle,
    last: IndexHandle,
}

#[derive(Default)]
struct Inner {
    arena: BlockIndexArena,
    forks: HashMap<ForkId, ForkState>,
    fork_names: HashMap<String, ForkId>,
    height_index: HashMap<ForkId, BTreeMap<u32, Vec<BlockHash>>>,
}

/// The block container: owns the append-only block file, all store namespaces, the index arena
/// and the per-fork tips. All multi-key mutations of one ingest go through a single store batch,
/// so a crash either leaves the full new state or the full pre-state.
pub struct BlockContainer<S: KeyValStore> {
    store: S,
    block_file: Mutex<BlockFile>,
    inner: RwLock<Inner>,
    debug: bool,
}

impl<S: KeyValStore> BlockContainer<S> {
    /// Open the container over `store` with block bodies under `path/block`. An unreadable index
    /// is cleared so the caller can rebuild from the time-series block file.
    pub fn new(store: S, path: impl AsRef<Path>, debug: bool) -> Result<Self, ChainError> {
        let block_file = BlockFile::new(path.as_ref().join("block"))?;
        let container = Self {
            store,
            block_file: Mutex::new(block_file),
            inner: RwLock::new(Inner::default()),
            debug,
        };
        if let Err(err) = container.load_db() {
            error!(
                target: LOG_TARGET,
                "Block index is inconsistent ({}), starting empty; rebuild from block storage", err
            );
            let mut inner = container.write_inner()?;
            *inner = Inner::default();
        }
        Ok(container)
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, ChainError> {
        self.inner
            .read()
            .map_err(|_| ChainError::StorageError("container lock poisoned".into()))
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, ChainError> {
        self.inner
            .write()
            .map_err(|_| ChainError::StorageError("container lock poisoned".into()))
    }

    fn lock_file(&self) -> Result<std::sync::MutexGuard<'_, BlockFile>, ChainError> {
        self.block_file
            .lock()
            .map_err(|_| ChainError::StorageError("block file lock poisoned".into()))
    }

    /// Rebuild the arena and fork tips from the persisted outlines.
    fn load_db(&self) -> Result<(), ChainError> {
        let mut outlines = Vec::new();
        let mut walk_err = None;
        self.store.for_each_prefix(&[db::PREFIX_BLOCK_OUTLINE], &mut |_, value| {
            match BlockOutline::decode(value) {
                Ok(outline) => outlines.push(outline),
                Err(err) => {
                    walk_err = Some(ChainError::StorageError(format!("bad outline: {err}")));
                    return IterationResult::Break;
                },
            }
            IterationResult::Continue
        })?;
        if let Some(err) = walk_err {
            return Err(err);
        }
        if outlines.is_empty() {
            return Ok(());
        }
        // parents sort before children: height first, extended/subsidiary ties by timestamp
        outlines.sort_by_key(|o| (o.height, o.timestamp));

        let mut inner = self.write_inner()?;
        for outline in outlines {
            let prev = if outline.hash_prev.is_zero() {
                None
            } else {
                Some(
                    inner
                        .arena
                        .handle_of(&outline.hash_prev)
                        .ok_or_else(|| ChainError::StorageError("outline references unknown prev".into()))?,
                )
            };
            let is_origin = (outline.block_type >> 15) != 0;
            let origin = if is_origin {
                IndexHandle(0) // fixed up on insert
            } else {
                inner
                    .arena
                    .handle_of(&outline.hash_origin)
                    .ok_or_else(|| ChainError::StorageError("outline references unknown origin".into()))?
            };
            let index = BlockIndex {
                hash: outline.hash,
                prev,
                origin,
                next: None,
                hash_prev: outline.hash_prev,
                hash_origin: outline.hash_origin,
                txid_mint: outline.txid_mint,
                mint_type: outline.mint_type,
                version: outline.version,
                block_type: outline.block_type,
                timestamp: outline.timestamp,
                height: outline.height,
                rand_beacon: outline.rand_beacon,
                chain_trust: outline.chain_trust,
                money_supply: outline.money_supply,
                proof_algo: outline.proof_algo,
                proof_bits: outline.proof_bits,
                file_no: outline.file_no,
                offset: outline.offset,
            };
            let fork = index.hash_origin;
            let fork = if is_origin { index.hash } else { fork };
            let handle = inner.arena.insert(index);
            let height = inner.arena.get(handle).height;
            let hash = inner.arena.get(handle).hash;
            inner
                .height_index
                .entry(fork)
                .or_default()
                .entry(height)
                .or_default()
                .push(hash);
        }

        // restore fork tips
        let mut actives = Vec::new();
        self.store.for_each_prefix(&[db::PREFIX_FORK_ACTIVE], &mut |key, value| {
            if key.len() == 33 && value.len() == 32 {
                let mut fork = [0u8; 32];
                fork.copy_from_slice(&key[1..]);
                let mut last = [0u8; 32];
                last.copy_from_slice(value);
                actives.push((Hash256(fork), Hash256(last)));
            }
            IterationResult::Continue
        })?;
        drop(inner);
        for (fork_id, last_hash) in actives {
            self.install_fork_state(&fork_id, &last_hash)?;
            let mut inner = self.write_inner()?;
            let last = inner
                .arena
                .handle_of(&last_hash)
                .ok_or_else(|| ChainError::StorageError("fork tip references unknown block".into()))?;
            update_next(&mut inner.arena, last);
        }
        Ok(())
    }

    /// Create the in-memory fork state for `fork_id` if it does not exist yet. The profile is
    /// parsed from the origin block's proof payload.
    fn install_fork_state(&self, fork_id: &ForkId, last_hash: &BlockHash) -> Result<(), ChainError> {
        {
            let inner = self.read_inner()?;
            if inner.forks.contains_key(fork_id) {
                return Ok(());
            }
        }
        let origin_block = self.retrieve(fork_id)?;
        let profile = ForkProfile::load(&origin_block.proof)
            .map_err(|e| ChainError::StorageError(format!("origin profile unreadable: {e}")))?;
        let mut inner = self.write_inner()?;
        let origin = inner.arena.handle_of(fork_id).ok_or(ChainError::NotFound)?;
        let last = inner.arena.handle_of(last_hash).ok_or(ChainError::NotFound)?;
        inner.fork_names.insert(profile.name.clone(), *fork_id);
        inner.forks.insert(*fork_id, ForkState { profile, origin, last });
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool, ChainError> {
        Ok(self.read_inner()?.arena.is_empty())
    }

    pub fn exists(&self, hash: &BlockHash) -> Result<bool, ChainError> {
        Ok(self.read_inner()?.arena.contains(hash))
    }

    /// Seed an empty container with the genesis block.
    pub fn initiate(
        &self,
        hash_genesis: &BlockHash,
        block_genesis: &Block,
        trust: ChainTrust,
    ) -> Result<(), ChainError> {
        if !self.is_empty()? {
            return Err(ChainError::AlreadyHave);
        }
        let profile = ForkProfile::load(&block_genesis.proof)
            .map_err(|_| ChainError::BlockInvalidFork)?;
        let blockex = BlockEx::from_block(block_genesis.clone());
        self.add_new(*hash_genesis, &blockex, trust)?;

        let ctxt = ForkContext::new(*hash_genesis, Hash256::zero(), Hash256::zero(), profile);
        self.add_new_fork_context(&ctxt)?;

        let mut view = BlockView::new(*hash_genesis, true);
        let mint = &block_genesis.tx_mint;
        view.add_tx(self, mint.get_hash(), mint, &Destination::Null, 0)?;
        view.add_block(*hash_genesis, blockex);
        self.commit_block_view(&view, hash_genesis)
    }

    pub fn retrieve_index(&self, hash: &BlockHash) -> Result<Option<BlockIndex>, ChainError> {
        Ok(self.read_inner()?.arena.get_by_hash(hash).cloned())
    }

    fn read_block_ex_at(&self, file_no: u32, offset: u32) -> Result<BlockEx, ChainError> {
        let body = self.lock_file()?.read(file_no, offset)?;
        Ok(BlockEx::decode(&body)?)
    }

    pub fn retrieve_ex(&self, hash: &BlockHash) -> Result<BlockEx, ChainError> {
        let index = self.retrieve_index(hash)?.ok_or(ChainError::NotFound)?;
        self.read_block_ex_at(index.file_no, index.offset)
    }

    pub fn retrieve(&self, hash: &BlockHash) -> Result<Block, ChainError> {
        Ok(self.retrieve_ex(hash)?.block)
    }

    /// The index entry of a fork's current tip.
    pub fn retrieve_fork(&self, fork_id: &ForkId) -> Result<Option<BlockIndex>, ChainError> {
        let inner = self.read_inner()?;
        Ok(inner
            .forks
            .get(fork_id)
            .map(|fork| inner.arena.get(fork.last).clone()))
    }

    pub fn retrieve_fork_by_name(&self, name: &str) -> Result<Option<ForkId>, ChainError> {
        Ok(self.read_inner()?.fork_names.get(name).copied())
    }

    pub fn retrieve_profile(&self, fork_id: &ForkId) -> Result<Option<ForkProfile>, ChainError> {
        Ok(self
            .read_inner()?
            .forks
            .get(fork_id)
            .map(|fork| fork.profile.clone()))
    }

    pub fn retrieve_origin(&self, fork_id: &ForkId) -> Result<Block, ChainError> {
        self.retrieve(fork_id)
    }

    pub fn retrieve_fork_context(&self, fork_id: &ForkId) -> Result<Option<ForkContext>, ChainError> {
        match self.store.get(&db::fork_ctxt_key(fork_id))? {
            Some(bytes) => Ok(Some(ForkContext::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn list_fork_contexts(&self) -> Result<Vec<ForkContext>, ChainError> {
        let mut contexts = Vec::new();
        let mut walk_err = None;
        self.store.for_each_prefix(&[db::PREFIX_FORK_CTXT], &mut |_, value| {
            match ForkContext::decode(value) {
                Ok(ctxt) => contexts.push(ctxt),
                Err(err) => {
                    walk_err = Some(ChainError::StorageError(format!("bad fork context: {err}")));
                    return IterationResult::Break;
                },
            }
            IterationResult::Continue
        })?;
        match walk_err {
            Some(err) => Err(err),
            None => Ok(contexts),
        }
    }

    /// Register a fork context. The parent must be registered first (unless the context is the
    /// genesis fork) and child forks must join at height one or above.
    pub fn add_new_fork_context(&self, ctxt: &ForkContext) -> Result<(), ChainError> {
        let key = db::fork_ctxt_key(&ctxt.fork_id);
        if self.store.exists(&key)? {
            return Err(ChainError::AlreadyHave);
        }
        if !ctxt.parent_id.is_zero() {
            if !self.store.exists(&db::fork_ctxt_key(&ctxt.parent_id))? {
                return Err(ChainError::MissingPrev);
            }
            if ctxt.joint_height() < 1 {
                return Err(ChainError::BlockInvalidFork);
            }
        }
        self.store.put(&key, ctxt.encoded(), false)?;
        Ok(())
    }

    pub fn list_forks(&self) -> Result<Vec<ForkStatus>, ChainError> {
        let inner = self.read_inner()?;
        let mut out = Vec::with_capacity(inner.forks.len());
        for (fork_id, fork) in &inner.forks {
            let origin = inner.arena.get(fork.origin);
            let last = inner.arena.get(fork.last);
            out.push(ForkStatus {
                fork_id: *fork_id,
                parent_id: inner.arena.parent_hash(fork.origin),
                name: fork.profile.name.clone(),
                origin_height: origin.height,
                last_block: last.hash,
                last_height: last.height,
                last_time: last.timestamp,
                money_supply: last.money_supply,
            });
        }
        out.sort_by_key(|status| status.fork_id);
        Ok(out)
    }

    pub fn get_block_count(&self, fork_id: &ForkId) -> Result<usize, ChainError> {
        let inner = self.read_inner()?;
        let fork = match inner.forks.get(fork_id) {
            Some(fork) => fork,
            None => return Ok(0),
        };
        let mut count = 0;
        let mut cursor = Some(fork.last);
        while let Some(handle) = cursor {
            count += 1;
            cursor = inner.arena.get(handle).prev;
        }
        Ok(count)
    }

    /// The hash of the last non-extended block at `height` on the active chain of `fork_id`.
    pub fn get_block_hash(&self, fork_id: &ForkId, height: u32) -> Result<Option<BlockHash>, ChainError> {
        let inner = self.read_inner()?;
        let fork = match inner.forks.get(fork_id) {
            Some(fork) => fork,
            None => return Ok(None),
        };
        let mut cursor = Some(fork.last);
        while let Some(handle) = cursor {
            let entry = inner.arena.get(handle);
            if entry.height < height {
                return Ok(None);
            }
            if entry.height == height && !entry.is_extended() {
                return Ok(Some(entry.hash));
            }
            cursor = entry.prev;
        }
        Ok(None)
    }

    /// Store a block body and create its index entry. `block_trust` is this block's own trust
    /// contribution; the entry accumulates it onto the predecessor's chain trust.
    pub fn add_new(
        &self,
        hash: BlockHash,
        blockex: &BlockEx,
        block_trust: ChainTrust,
    ) -> Result<BlockIndex, ChainError> {
        if self.exists(&hash)? {
            return Err(ChainError::AlreadyHave);
        }
        let body = blockex.encoded();
        let (file_no, offset) = self.lock_file()?.append(&body)?;

        let block = &blockex.block;
        let mut inner = self.write_inner()?;
        let mut index = BlockIndex::from_block(hash, block, file_no, offset);

        if block.is_genesis() {
            index.prev = None;
        } else {
            let prev = inner
                .arena
                .handle_of(&block.hash_prev)
                .ok_or(ChainError::MissingPrev)?;
            index.prev = Some(prev);
        }

        if block.is_origin() {
            index.rand_beacon = block.get_block_beacon();
            index.money_supply = block.get_block_mint();
            index.chain_trust = block_trust;
        } else {
            // non-origin blocks always have a predecessor
            let prev = match index.prev {
                Some(prev) => prev,
                None => return Err(ChainError::MissingPrev),
            };
            let prev_entry = inner.arena.get(prev);
            let origin = prev_entry.origin;
            let origin_beacon = inner.arena.get(origin).rand_beacon;
            let prev_beacon = inner.arena.get(prev).rand_beacon;
            let prev_trust = inner.arena.get(prev).chain_trust;
            let prev_supply = inner.arena.get(prev).money_supply;
            index.origin = origin;
            index.rand_beacon = prev_beacon ^ origin_beacon;
            index.chain_trust = prev_trust + block_trust;
            index.money_supply = prev_supply + block.get_block_mint();
        }

        let handle = inner.arena.insert(index);
        let entry = inner.arena.get(handle).clone();

        let mut batch = WriteBatch::new();
        batch.put(
            db::outline_key(&hash),
            BlockOutline::from_index(&inner.arena, handle).encoded(),
        );
        if block.is_primary() && !block.is_vacant() {
            let enrolls: Vec<EnrollEntry> = block
                .vtx
                .iter()
                .filter(|tx| tx.is_cert())
                .map(|tx| EnrollEntry {
                    anchor_height: tx.hash_anchor.height(),
                    dest: tx.send_to.clone(),
                    amount: tx.amount,
                    data: tx.data.clone(),
                })
                .collect();
            if !enrolls.is_empty() {
                batch.put(db::delegate_key(&hash), DelegateBlockRecord { enrolls }.encoded());
            }
        }
        self.store.commit(batch)?;

        let fork = entry.hash_origin;
        inner
            .height_index
            .entry(fork)
            .or_default()
            .entry(entry.height)
            .or_default()
            .push(hash);
        Ok(entry)
    }

    /// Open a view on `base`. When the base is not the fork tip, the view overlay is primed with
    /// the rollback of the tip-side branch and the forward application of the base-side branch,
    /// and the block add/remove lists record that reorganization.
    pub fn get_block_view(&self, base: &BlockHash, committable: bool) -> Result<BlockView, ChainError> {
        let (fork_id, rollback, forward) = {
            let inner = self.read_inner()?;
            let base_handle = inner.arena.handle_of(base).ok_or(ChainError::NotFound)?;
            let fork_id = inner.arena.get(base_handle).hash_origin;
            match inner.forks.get(&fork_id) {
                Some(fork) if fork.last != base_handle => {
                    let (rollback, forward) = branch_paths(&inner.arena, fork.last, base_handle)?;
                    let to_pos = |handles: Vec<IndexHandle>| {
                        handles
                            .into_iter()
                            .map(|h| {
                                let e = inner.arena.get(h);
                                (e.hash, e.file_no, e.offset)
                            })
                            .collect::<Vec<_>>()
                    };
                    (fork_id, to_pos(rollback), to_pos(forward))
                },
                _ => (fork_id, Vec::new(), Vec::new()),
            }
        };

        let mut view = BlockView::new(fork_id, committable);
        for (hash, file_no, offset) in rollback {
            let blockex = self.read_block_ex_at(file_no, offset)?;
            self.rollback_block_in_view(&mut view, hash, blockex);
        }
        for (hash, file_no, offset) in forward {
            let blockex = self.read_block_ex_at(file_no, offset)?;
            self.apply_block_in_view(&mut view, hash, blockex)?;
        }
        Ok(view)
    }

    /// A read-only view on a fork's current tip.
    pub fn get_fork_block_view(&self, fork_id: &ForkId) -> Result<BlockView, ChainError> {
        let last = self
            .retrieve_fork(fork_id)?
            .ok_or(ChainError::NotFound)?;
        self.get_block_view(&last.hash, false)
    }

    /// A fresh committable view for an isolated fork that inherits nothing.
    pub fn get_new_fork_view(&self, fork_id: &ForkId) -> BlockView {
        BlockView::new(*fork_id, true)
    }

    fn rollback_block_in_view(&self, view: &mut BlockView, hash: BlockHash, blockex: BlockEx) {
        let default_ctxt = Default::default();
        for (i, tx) in blockex.block.vtx.iter().enumerate().rev() {
            let ctxt = blockex.tx_contexts.get(i).unwrap_or(&default_ctxt);
            view.remove_tx(tx.get_hash(), tx, ctxt);
        }
        if !blockex.block.is_vacant() {
            let mint = &blockex.block.tx_mint;
            view.remove_tx(mint.get_hash(), mint, &default_ctxt);
        }
        view.remove_block(hash, blockex);
    }

    fn apply_block_in_view(
        &self,
        view: &mut BlockView,
        hash: BlockHash,
        blockex: BlockEx,
    ) -> Result<(), ChainError> {
        if !blockex.block.is_vacant() {
            let mint = &blockex.block.tx_mint;
            view.add_tx(self, mint.get_hash(), mint, &Destination::Null, 0)?;
        }
        let default_ctxt = Default::default();
        for (i, tx) in blockex.block.vtx.iter().enumerate() {
            let ctxt = blockex.tx_contexts.get(i).unwrap_or(&default_ctxt);
            view.add_tx(self, tx.get_hash(), tx, &ctxt.dest_in, ctxt.get_value_in())?;
        }
        view.add_block(hash, blockex);
        Ok(())
    }

    /// Atomically persist a committable view and promote `new_last` to the fork tip: unspent
    /// deltas, tx-index updates, invite relations on DeFi forks and the fork-active pointer all
    /// land in one store batch, then the in-memory tip and the materialized next-chain move.
    pub fn commit_block_view(&self, view: &BlockView, new_last: &BlockHash) -> Result<(), ChainError> {
        let new_handle = {
            let inner = self.read_inner()?;
            inner.arena.handle_of(new_last).ok_or(ChainError::NotFound)?
        };
        let fork_id = {
            let inner = self.read_inner()?;
            inner.arena.get(new_handle).hash_origin
        };
        self.install_fork_state(&fork_id, new_last)?;

        let is_defi = {
            let inner = self.read_inner()?;
            inner
                .forks
                .get(&fork_id)
                .map(|fork| fork.profile.is_defi())
                .unwrap_or(false)
        };

        let mut batch = WriteBatch::new();

        let (unspent_add, unspent_remove) = view.get_unspent_changes();
        for (point, output) in &unspent_add {
            batch.put(db::unspent_key(&fork_id, point), output.encoded());
        }
        for point in &unspent_remove {
            batch.delete(db::unspent_key(&fork_id, point));
        }

        let (blocks_add, blocks_remove) = view.get_block_changes();
        {
            let inner = self.read_inner()?;
            for (hash, blockex) in blocks_add {
                let entry = inner.arena.get_by_hash(hash).ok_or(ChainError::NotFound)?;
                let record = TxIndexRecord {
                    height: entry.height,
                    file_no: entry.file_no,
                    offset: entry.offset,
                };
                if !blockex.block.is_vacant() {
                    batch.put(
                        db::tx_index_key(&fork_id, &blockex.block.tx_mint.get_hash()),
                        record.encoded(),
                    );
                }
                for tx in &blockex.block.vtx {
                    batch.put(db::tx_index_key(&fork_id, &tx.get_hash()), record.encoded());
                }
            }
            for (_, blockex) in blocks_remove {
                if !blockex.block.is_vacant() {
                    batch.delete(db::tx_index_key(&fork_id, &blockex.block.tx_mint.get_hash()));
                }
                for tx in &blockex.block.vtx {
                    batch.delete(db::tx_index_key(&fork_id, &tx.get_hash()));
                }
            }
        }

        if is_defi {
            self.record_invite_relations(&fork_id, blocks_add, blocks_remove, &mut batch)?;
        }

        batch.put(db::fork_active_key(&fork_id), new_last.to_vec());
        self.store.commit(batch)?;

        let mut inner = self.write_inner()?;
        update_next(&mut inner.arena, new_handle);
        if let Some(fork) = inner.forks.get_mut(&fork_id) {
            fork.last = new_handle;
        }
        Ok(())
    }

    /// On a DeFi fork the first incoming transfer to a fresh address establishes the invite
    /// relation sender → receiver. Relations are immutable once set and cycles are rejected by
    /// walking the prospective parent's chain.
    fn record_invite_relations(
        &self,
        fork_id: &ForkId,
        blocks_add: &[(BlockHash, BlockEx)],
        blocks_remove: &[(BlockHash, BlockEx)],
        batch: &mut WriteBatch,
    ) -> Result<(), ChainError> {
        let mut deleted: std::collections::HashSet<Destination> = Default::default();
        for (_, blockex) in blocks_remove {
            for tx in &blockex.block.vtx {
                if let Some(info) = self.get_address_info(fork_id, &tx.send_to)? {
                    if info.txid == tx.get_hash() {
                        batch.delete(db::address_info_key(fork_id, &tx.send_to));
                        deleted.insert(tx.send_to.clone());
                    }
                }
            }
        }

        let mut pending: HashMap<Destination, AddrInfo> = HashMap::new();
        for (_, blockex) in blocks_add {
            for (i, tx) in blockex.block.vtx.iter().enumerate() {
                let dest_in = blockex
                    .tx_contexts
                    .get(i)
                    .map(|c| c.dest_in.clone())
                    .unwrap_or_default();
                if dest_in.is_null() || tx.send_to.is_null() || dest_in == tx.send_to {
                    continue;
                }
                let known = pending.contains_key(&tx.send_to)
                    || (!deleted.contains(&tx.send_to)
                        && self.get_address_info(fork_id, &tx.send_to)?.is_some());
                if known {
                    continue;
                }
                // reject a relation that would close a cycle through the receiver
                let mut cursor = dest_in.clone();
                let mut cyclic = false;
                for _ in 0..1024 {
                    if cursor == tx.send_to {
                        cyclic = true;
                        break;
                    }
                    let parent = match pending.get(&cursor) {
                        Some(info) => Some(info.parent.clone()),
                        None if deleted.contains(&cursor) => None,
                        None => self.get_address_info(fork_id, &cursor)?.map(|i| i.parent),
                    };
                    match parent {
                        Some(parent) => cursor = parent,
                        None => break,
                    }
                }
                if cyclic {
                    warn!(
                        target: LOG_TARGET,
                        "Rejecting cyclic invite relation {} -> {}", dest_in, tx.send_to
                    );
                    continue;
                }
                let root = match pending.get(&dest_in) {
                    Some(info) => info.root.clone(),
                    None if deleted.contains(&dest_in) => dest_in.clone(),
                    None => self
                        .get_address_info(fork_id, &dest_in)?
                        .map(|i| i.root)
                        .unwrap_or_else(|| dest_in.clone()),
                };
                let info = AddrInfo {
                    parent: dest_in,
                    root,
                    txid: tx.get_hash(),
                };
                batch.put(db::address_info_key(fork_id, &tx.send_to), info.encoded());
                pending.insert(tx.send_to.clone(), info);
            }
        }
        Ok(())
    }

    pub fn get_address_info(
        &self,
        fork_id: &ForkId,
        dest: &Destination,
    ) -> Result<Option<AddrInfo>, ChainError> {
        match self.store.get(&db::address_info_key(fork_id, dest))? {
            Some(bytes) => Ok(Some(AddrInfo::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All invite relations of a DeFi fork, keyed by invited address.
    pub fn list_fork_address_info(
        &self,
        fork_id: &ForkId,
    ) -> Result<BTreeMap<Destination, AddrInfo>, ChainError> {
        let prefix = db::address_info_prefix(fork_id);
        let mut out = BTreeMap::new();
        let mut walk_err = None;
        self.store.for_each_prefix(&prefix, &mut |key, value| {
            let dest_bytes = &key[prefix.len()..];
            match (Destination::decode(dest_bytes), AddrInfo::decode(value)) {
                (Ok(dest), Ok(info)) => {
                    out.insert(dest, info);
                    IterationResult::Continue
                },
                _ => {
                    walk_err = Some(ChainError::StorageError("bad address info record".into()));
                    IterationResult::Break
                },
            }
        })?;
        match walk_err {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// Aggregate coin balances of a fork's unspent set, in whole fixed-point units per address.
    pub fn list_fork_address_amounts(
        &self,
        fork_id: &ForkId,
    ) -> Result<BTreeMap<Destination, i64>, ChainError> {
        let prefix = db::unspent_prefix(fork_id);
        let mut out: BTreeMap<Destination, i64> = BTreeMap::new();
        let mut walk_err = None;
        self.store.for_each_prefix(&prefix, &mut |_, value| {
            match TxOut::decode(value) {
                Ok(output) => {
                    if !output.dest_to.is_null() {
                        *out.entry(output.dest_to).or_default() += output.amount;
                    }
                    IterationResult::Continue
                },
                Err(_) => {
                    walk_err = Some(ChainError::StorageError("bad unspent record".into()));
                    IterationResult::Break
                },
            }
        })?;
        match walk_err {
            Some(err) => Err(err),
            None => Ok(out),
        }
    }

    /// The delegate enrollments of a single primary block, as `(anchor height, destination)`.
    pub fn get_block_enrolls(&self, hash: &BlockHash) -> Result<Vec<EnrollEntry>, ChainError> {
        match self.store.get(&db::delegate_key(hash))? {
            Some(bytes) => Ok(DelegateBlockRecord::decode(&bytes)?.enrolls),
            None => Ok(Vec::new()),
        }
    }

    /// Aggregate the enrollment window `block_range` (newest first) into a snapshot. Only CERTs
    /// anchored at `cutoff_height` or above count, and only destinations whose aggregate stake
    /// reaches `min_enroll_amount` enroll.
    pub fn retrieve_avail_delegate(
        &self,
        block_range: &[BlockHash],
        cutoff_height: u32,
        min_enroll_amount: i64,
    ) -> Result<DelegateEnrolled, ChainError> {
        let mut amounts: BTreeMap<Destination, i64> = BTreeMap::new();
        let mut data: BTreeMap<Destination, Vec<u8>> = BTreeMap::new();
        for hash in block_range {
            for enroll in self.get_block_enrolls(hash)? {
                if enroll.anchor_height < cutoff_height {
                    continue;
                }
                *amounts.entry(enroll.dest.clone()).or_default() += enroll.amount;
                data.entry(enroll.dest).or_insert(enroll.data);
            }
        }

        let mut enrolled = DelegateEnrolled::default();
        for (dest, amount) in amounts {
            if amount < min_enroll_amount {
                continue;
            }
            let weight = (amount / min_enroll_amount).max(1) as u32;
            enrolled.map_weight.insert(dest.clone(), weight);
            if let Some(bytes) = data.remove(&dest) {
                enrolled.map_enroll_data.insert(dest.clone(), bytes);
            }
            enrolled.vec_amount.push((dest, amount));
        }
        Ok(enrolled)
    }

    pub fn retrieve_tx(&self, fork_id: &ForkId, txid: &TxId) -> Result<Option<Transaction>, ChainError> {
        let record = match self.store.get(&db::tx_index_key(fork_id, txid))? {
            Some(bytes) => TxIndexRecord::decode(&bytes)?,
            None => return Ok(None),
        };
        let blockex = self.read_block_ex_at(record.file_no, record.offset)?;
        if blockex.block.tx_mint.get_hash() == *txid {
            return Ok(Some(blockex.block.tx_mint));
        }
        Ok(blockex.block.vtx.into_iter().find(|tx| tx.get_hash() == *txid))
    }

    pub fn exists_tx(&self, fork_id: &ForkId, txid: &TxId) -> Result<bool, ChainError> {
        Ok(self.store.exists(&db::tx_index_key(fork_id, txid))?)
    }

    /// Light startup consistency check: every fork tip must resolve to an indexed block whose
    /// fork matches, down to `check_depth` predecessors (0 = tips only).
    pub fn check_consistency(&self, _check_level: u32, check_depth: u32) -> Result<bool, ChainError> {
        let inner = self.read_inner()?;
        for (fork_id, fork) in &inner.forks {
            let mut cursor = Some(fork.last);
            let mut depth = 0;
            while let Some(handle) = cursor {
                let entry = inner.arena.get(handle);
                if !entry.is_origin() && entry.hash_origin != *fork_id {
                    return Ok(false);
                }
                if check_depth != 0 && depth >= check_depth {
                    break;
                }
                depth += 1;
                cursor = entry.prev;
            }
        }
        Ok(true)
    }

    /// Chain-trust tie-break support: `this` and `other` are equivalent when `other` is reachable
    /// from `this` through VACANT placeholders of equal or higher height.
    pub fn is_equivalent(&self, this: &BlockHash, other: &BlockHash) -> Result<bool, ChainError> {
        let inner = self.read_inner()?;
        let this = inner.arena.handle_of(this).ok_or(ChainError::NotFound)?;
        let other = inner.arena.handle_of(other).ok_or(ChainError::NotFound)?;
        Ok(inner.arena.is_equivalent(this, other))
    }

    /// Walk `steps` predecessors back from `hash`.
    pub fn get_ancestor(&self, hash: &BlockHash, steps: u32) -> Result<Option<BlockIndex>, ChainError> {
        let inner = self.read_inner()?;
        let mut cursor = match inner.arena.handle_of(hash) {
            Some(handle) => handle,
            None => return Ok(None),
        };
        for _ in 0..steps {
            cursor = match inner.arena.get(cursor).prev {
                Some(prev) => prev,
                None => return Ok(None),
            };
        }
        Ok(Some(inner.arena.get(cursor).clone()))
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }
}

impl<S: KeyValStore> crate::validation::BlockIndexLookup for BlockContainer<S> {
    fn get_block_index(&self, hash: &BlockHash) -> Option<BlockIndex> {
        self.retrieve_index(hash).ok().flatten()
    }
}

impl<S: KeyValStore> UnspentReader for BlockContainer<S> {
    fn get_unspent(&self, fork: &ForkId, point: &TxOutPoint) -> Result<Option<TxOut>, ChainError> {
        match self.store.get(&db::unspent_key(fork, point))? {
            Some(bytes) => Ok(Some(TxOut::decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// Split the paths between the current tip and a new base into the blocks to roll back (tip side,
/// newest first) and the blocks to apply (base side, oldest first).
fn branch_paths(
    arena: &BlockIndexArena,
    last: IndexHandle,
    base: IndexHandle,
) -> Result<(Vec<IndexHandle>, Vec<IndexHandle>), ChainError> {
    let mut rollback = Vec::new();
    let mut forward = Vec::new();
    let mut p = last;
    let mut q = base;
    while p != q {
        let ep = arena.get(p);
        let eq = arena.get(q);
        match (ep.prev, eq.prev) {
            (None, None) => {
                return Err(ChainError::StorageError(
                    "branch walk reached two distinct roots".into(),
                ))
            },
            (Some(pp), None) => {
                rollback.push(p);
                p = pp;
            },
            (None, Some(qq)) => {
                forward.push(q);
                q = qq;
            },
            (Some(pp), Some(qq)) => {
                if (ep.height, ep.timestamp) >= (eq.height, eq.timestamp) {
                    rollback.push(p);
                    p = pp;
                } else {
                    forward.push(q);
                    q = qq;
                }
            },
        }
    }
    forward.reverse();
    Ok((rollback, forward))
}

/// Re-materialize the `next` chain so that following `next` from the origin reaches `last`, and
/// no stale forward links survive off the new active path.
fn update_next(arena: &mut BlockIndexArena, last: IndexHandle) {
    clear_forward_chain(arena, last);
    let mut cursor = last;
    loop {
        let (is_origin, prev) = {
            let entry = arena.get(cursor);
            (entry.is_origin(), entry.prev)
        };
        if is_origin {
            break;
        }
        let prev = match prev {
            Some(prev) => prev,
            None => break,
        };
        if arena.get(prev).next == Some(cursor) {
            break;
        }
        clear_forward_chain(arena, prev);
        arena.get_mut(prev).next = Some(cursor);
        cursor = prev;
    }
}

fn clear_forward_chain(arena: &mut BlockIndexArena, from: IndexHandle) {
    let mut cursor = arena.get(from).next;
    arena.get_mut(from).next = None;
    while let Some(handle) = cursor {
        cursor = arena.get(handle).next;
        arena.get_mut(handle).next = None;
    }
}

#[cfg(test)]
mod test {
    use quasar_storage::MemoryKeyValStore;
    use tempfile::tempdir;

    use super::*;
    use crate::{
        consensus::{get_genesis_block, ConsensusConstantsBuilder, Network},
        proof_of_work::block_trust_from_bits,
    };

    fn new_container() -> (BlockContainer<MemoryKeyValStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let container = BlockContainer::new(MemoryKeyValStore::new(), dir.path(), true).unwrap();
        (container, dir)
    }

    #[test]
    fn initiate_seeds_genesis_fork() {
        let (container, _dir) = new_container();
        let constants = ConsensusConstantsBuilder::new(Network::LocalTest).build();
        let genesis = get_genesis_block(&constants);
        let hash = genesis.get_hash();

        assert!(container.is_empty().unwrap());
        container
            .initiate(&hash, &genesis, block_trust_from_bits(0))
            .unwrap();
        assert!(!container.is_empty().unwrap());
        assert!(container.exists(&hash).unwrap());

        let tip = container.retrieve_fork(&hash).unwrap().unwrap();
        assert_eq!(tip.hash, hash);
        assert_eq!(tip.height, 0);
        assert_eq!(container.get_block_count(&hash).unwrap(), 1);

        // the genesis mint output is spendable
        let point = TxOutPoint::new(genesis.tx_mint.get_hash(), 0);
        let unspent = container.get_unspent(&hash, &point).unwrap().unwrap();
        assert_eq!(unspent.amount, constants.genesis_amount);

        // the stored block round-trips
        let stored = container.retrieve(&hash).unwrap();
        assert_eq!(stored.get_hash(), hash);

        // and the registered fork context matches the profile in the proof
        let ctxt = container.retrieve_fork_context(&hash).unwrap().unwrap();
        assert_eq!(ctxt.fork_id, hash);
        assert!(ctxt.parent_id.is_zero());
    }

    #[test]
    fn duplicate_initiate_rejected() {
        let (container, _dir) = new_container();
        let constants = ConsensusConstantsBuilder::new(Network::LocalTest).build();
        let genesis = get_genesis_block(&constants);
        let hash = genesis.get_hash();
        container
            .initiate(&hash, &genesis, block_trust_from_bits(0))
            .unwrap();
        assert_eq!(
            container
                .initiate(&hash, &genesis, block_trust_from_bits(0))
                .unwrap_err(),
            ChainError::AlreadyHave
        );
    }

    #[test]
    fn container_reloads_from_store() {
        let dir = tempdir().unwrap();
        let store = MemoryKeyValStore::new();
        let constants = ConsensusConstantsBuilder::new(Network::LocalTest).build();
        let genesis = get_genesis_block(&constants);
        let hash = genesis.get_hash();
        {
            let container = BlockContainer::new(store.clone(), dir.path(), false).unwrap();
            container
                .initiate(&hash, &genesis, block_trust_from_bits(0))
                .unwrap();
        }
        let container = BlockContainer::new(store, dir.path(), false).unwrap();
        assert!(container.exists(&hash).unwrap());
        let tip = container.retrieve_fork(&hash).unwrap().unwrap();
        assert_eq!(tip.hash, hash);
        assert!(container.check_consistency(1, 0).unwrap());
    }

    #[test]
    fn fork_context_requires_registered_parent() {
        let (container, _dir) = new_container();
        let profile = ForkProfile {
            name: "orphan".into(),
            parent: Hash256([9u8; 32]),
            joint_height: 5,
            ..Default::default()
        };
        let ctxt = ForkContext::new(Hash256([1u8; 32]), Hash256([2u8; 32]), Hash256([3u8; 32]), profile);
        assert_eq!(
            container.add_new_fork_context(&ctxt).unwrap_err(),
            ChainError::MissingPrev
        );
    }
}
