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

use std::collections::HashMap;

use quasar_common_types::{BlockHash, ChainTrust, Hash256, TxId};

use crate::{
    blocks::{Block, BlockType},
    codec::{ByteReader, CodecError, Decodable, Encodable},
    proof_of_work::HashWorkProof,
};

/// A dense handle into the block index arena. Handles are stable for the lifetime of a process;
/// the arena is rebuilt from the block-outline namespace on restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexHandle(pub(crate) u32);

impl IndexHandle {
    pub fn as_usize(&self) -> usize {
        self.0 as usize
    }
}

/// One entry of the block index graph. `prev`/`origin`/`next` are arena handles; `origin` points
/// at the origin block of the entry's fork and is the entry itself for origin blocks.
#[derive(Debug, Clone)]
pub struct BlockIndex {
    pub hash: BlockHash,
    pub prev: Option<IndexHandle>,
    pub origin: IndexHandle,
    pub next: Option<IndexHandle>,
    /// Hash of the predecessor (zero for the genesis block); kept beside the handle so callers
    /// can walk the graph without holding the arena.
    pub hash_prev: BlockHash,
    /// Hash of this entry's fork origin.
    pub hash_origin: BlockHash,
    pub txid_mint: TxId,
    pub mint_type: u16,
    pub version: u16,
    pub block_type: u16,
    pub timestamp: u32,
    pub height: u32,
    pub rand_beacon: u64,
    pub chain_trust: ChainTrust,
    pub money_supply: i64,
    pub proof_algo: u8,
    pub proof_bits: u8,
    pub file_no: u32,
    pub offset: u32,
}

impl BlockIndex {
    /// Build the immutable part of an index entry from a block body. Linkage, trust, supply and
    /// beacon are filled in by the container when the entry joins the graph.
    pub fn from_block(hash: BlockHash, block: &Block, file_no: u32, offset: u32) -> Self {
        let (proof_algo, proof_bits) = if block.is_proof_of_work() {
            match HashWorkProof::load(&block.proof) {
                Ok(proof) => (proof.algo, proof.bits),
                Err(_) => (0, 0),
            }
        } else {
            (0, 0)
        };
        Self {
            hash,
            prev: None,
            origin: IndexHandle(0),
            next: None,
            hash_prev: block.hash_prev,
            hash_origin: Hash256::zero(),
            txid_mint: if block.is_vacant() {
                Hash256::zero()
            } else {
                block.tx_mint.get_hash()
            },
            mint_type: block.tx_mint.tx_type,
            version: block.version,
            block_type: block.block_type,
            timestamp: block.timestamp,
            height: block.get_block_height(),
            rand_beacon: 0,
            chain_trust: ChainTrust::zero(),
            money_supply: 0,
            proof_algo,
            proof_bits,
            file_no,
            offset,
        }
    }

    pub fn is_origin(&self) -> bool {
        (self.block_type >> 15) != 0
    }

    pub fn is_primary(&self) -> bool {
        (self.block_type & 1) != 0
    }

    pub fn is_extended(&self) -> bool {
        self.block_type == BlockType::Extended as u16
    }

    pub fn is_vacant(&self) -> bool {
        self.block_type == BlockType::Vacant as u16
    }

    pub fn is_proof_of_work(&self) -> bool {
        self.mint_type == crate::transactions::TxType::MintWork as u16
    }
}

/// The block index graph as an arena, replacing raw prev/origin/next pointers with dense `u32`
/// handles.
#[derive(Default)]
pub struct BlockIndexArena {
    entries: Vec<BlockIndex>,
    lookup: HashMap<BlockHash, IndexHandle>,
}

impl BlockIndexArena {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lookup.clear();
    }

    pub fn contains(&self, hash: &BlockHash) -> bool {
        self.lookup.contains_key(hash)
    }

    pub fn handle_of(&self, hash: &BlockHash) -> Option<IndexHandle> {
        self.lookup.get(hash).copied()
    }

    pub fn get(&self, handle: IndexHandle) -> &BlockIndex {
        &self.entries[handle.as_usize()]
    }

    pub fn get_mut(&mut self, handle: IndexHandle) -> &mut BlockIndex {
        &mut self.entries[handle.as_usize()]
    }

    pub fn get_by_hash(&self, hash: &BlockHash) -> Option<&BlockIndex> {
        self.handle_of(hash).map(|h| self.get(h))
    }

    /// Insert an entry, registering its hash. The entry's `origin` handle must already be correct
    /// or be fixed up by the caller (origin blocks point at themselves).
    pub fn insert(&mut self, mut index: BlockIndex) -> IndexHandle {
        let handle = IndexHandle(self.entries.len() as u32);
        if index.is_origin() {
            index.origin = handle;
            index.hash_origin = index.hash;
        } else {
            index.hash_origin = self.get(index.origin).hash;
        }
        self.lookup.insert(index.hash, handle);
        self.entries.push(index);
        handle
    }

    pub fn origin_hash(&self, handle: IndexHandle) -> BlockHash {
        let entry = self.get(handle);
        self.get(entry.origin).hash
    }

    /// The origin hash of the parent fork, or zero for the genesis fork.
    pub fn parent_hash(&self, handle: IndexHandle) -> BlockHash {
        let origin = self.get(self.get(handle).origin);
        match origin.prev {
            Some(prev) => self.origin_hash(prev),
            None => Hash256::zero(),
        }
    }

    /// True if `other` is reachable from `this` by walking `prev` through VACANT blocks of equal
    /// or higher height. Two such tips describe the same useful chain and must not trigger a
    /// reorganization between each other.
    pub fn is_equivalent(&self, this: IndexHandle, other: IndexHandle) -> bool {
        let mut cursor = Some(this);
        let other_height = self.get(other).height;
        while let Some(handle) = cursor {
            if handle == other {
                return true;
            }
            let entry = self.get(handle);
            if entry.block_type != BlockType::Vacant as u16 || entry.height <= other_height {
                break;
            }
            cursor = entry.prev;
        }
        false
    }
}

/// The persisted form of a [`BlockIndex`]: handle links replaced by block hashes. One record per
/// block lives in the block-outline namespace and the arena is rebuilt from them at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOutline {
    pub hash: BlockHash,
    pub hash_prev: BlockHash,
    pub hash_origin: BlockHash,
    pub txid_mint: TxId,
    pub mint_type: u16,
    pub version: u16,
    pub block_type: u16,
    pub timestamp: u32,
    pub height: u32,
    pub rand_beacon: u64,
    pub chain_trust: ChainTrust,
    pub money_supply: i64,
    pub proof_algo: u8,
    pub proof_bits: u8,
    pub file_no: u32,
    pub offset: u32,
}

impl BlockOutline {
    pub fn from_index(arena: &BlockIndexArena, handle: IndexHandle) -> Self {
        let entry = arena.get(handle);
        Self {
            hash: entry.hash,
            hash_prev: entry.prev.map(|p| arena.get(p).hash).unwrap_or_default(),
            hash_origin: arena.get(entry.origin).hash,
            txid_mint: entry.txid_mint,
            mint_type: entry.mint_type,
            version: entry.version,
            block_type: entry.block_type,
            timestamp: entry.timestamp,
            height: entry.height,
            rand_beacon: entry.rand_beacon,
            chain_trust: entry.chain_trust,
            money_supply: entry.money_supply,
            proof_algo: entry.proof_algo,
            proof_bits: entry.proof_bits,
            file_no: entry.file_no,
            offset: entry.offset,
        }
    }
}

fn encode_trust(trust: &ChainTrust, buf: &mut Vec<u8>) {
    let mut bytes = [0u8; 32];
    trust.to_little_endian(&mut bytes);
    buf.extend_from_slice(&bytes);
}

fn decode_trust(reader: &mut ByteReader<'_>) -> Result<ChainTrust, CodecError> {
    let hash = reader.read_hash()?;
    Ok(ChainTrust::from_little_endian(hash.as_bytes()))
}

impl Encodable for BlockOutline {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.hash.encode_into(buf)?;
        self.hash_prev.encode_into(buf)?;
        self.hash_origin.encode_into(buf)?;
        self.txid_mint.encode_into(buf)?;
        self.mint_type.encode_into(buf)?;
        self.version.encode_into(buf)?;
        self.block_type.encode_into(buf)?;
        self.timestamp.encode_into(buf)?;
        self.height.encode_into(buf)?;
        self.rand_beacon.encode_into(buf)?;
        encode_trust(&self.chain_trust, buf);
        self.money_supply.encode_into(buf)?;
        buf.push(self.proof_algo);
        buf.push(self.proof_bits);
        self.file_no.encode_into(buf)?;
        self.offset.encode_into(buf)
    }
}

impl Decodable for BlockOutline {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            hash: reader.read_hash()?,
            hash_prev: reader.read_hash()?,
            hash_origin: reader.read_hash()?,
            txid_mint: reader.read_hash()?,
            mint_type: reader.read_u16()?,
            version: reader.read_u16()?,
            block_type: reader.read_u16()?,
            timestamp: reader.read_u32()?,
            height: reader.read_u32()?,
            rand_beacon: reader.read_u64()?,
            chain_trust: decode_trust(reader)?,
            money_supply: reader.read_i64()?,
            proof_algo: reader.read_u8()?,
            proof_bits: reader.read_u8()?,
            file_no: reader.read_u32()?,
            offset: reader.read_u32()?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn index(hash: u8, height: u32, block_type: BlockType) -> BlockIndex {
        BlockIndex {
            hash: Hash256([hash; 32]).with_height(height),
            prev: None,
            origin: IndexHandle(0),
            next: None,
            hash_prev: Hash256::zero(),
            hash_origin: Hash256::zero(),
            txid_mint: Hash256::zero(),
            mint_type: 0,
            version: 1,
            block_type: block_type as u16,
            timestamp: height * 60,
            height,
            rand_beacon: 0,
            chain_trust: ChainTrust::from(height),
            money_supply: 0,
            proof_algo: 0,
            proof_bits: 0,
            file_no: 0,
            offset: 0,
        }
    }

    #[test]
    fn arena_lookup() {
        let mut arena = BlockIndexArena::new();
        let genesis = index(1, 0, BlockType::Genesis);
        let hash = genesis.hash;
        let handle = arena.insert(genesis);
        assert_eq!(arena.handle_of(&hash), Some(handle));
        // origin of an origin block is itself
        assert_eq!(arena.get(handle).origin, handle);
        assert_eq!(arena.origin_hash(handle), hash);
        assert!(arena.parent_hash(handle).is_zero());
    }

    #[test]
    fn equivalence_walks_vacant_blocks_only() {
        let mut arena = BlockIndexArena::new();
        let origin = arena.insert(index(1, 0, BlockType::Genesis));

        let mut primary = index(2, 1, BlockType::Subsidiary);
        primary.prev = Some(origin);
        primary.origin = origin;
        let tip = arena.insert(primary);

        let mut vacant2 = index(3, 2, BlockType::Vacant);
        vacant2.prev = Some(tip);
        vacant2.origin = origin;
        let vacant2 = arena.insert(vacant2);

        let mut vacant3 = index(4, 3, BlockType::Vacant);
        vacant3.prev = Some(vacant2);
        vacant3.origin = origin;
        let vacant3 = arena.insert(vacant3);

        // the vacant extension is equivalent to the tip it extends
        assert!(arena.is_equivalent(vacant3, tip));
        // but not the other way around
        assert!(!arena.is_equivalent(tip, vacant3));
        // a non-vacant block stops the walk
        assert!(!arena.is_equivalent(tip, origin));
        assert!(arena.is_equivalent(tip, tip));
    }

    #[test]
    fn outline_round_trip() {
        let mut arena = BlockIndexArena::new();
        let genesis = arena.insert(index(1, 0, BlockType::Genesis));
        let mut next = index(2, 1, BlockType::Primary);
        next.prev = Some(genesis);
        next.origin = genesis;
        next.chain_trust = ChainTrust::from(123456u64);
        next.money_supply = 1_000_000;
        let handle = arena.insert(next);

        let outline = BlockOutline::from_index(&arena, handle);
        let bytes = outline.encoded();
        assert_eq!(BlockOutline::decode(&bytes).unwrap(), outline);
        assert_eq!(outline.hash_prev, arena.get(genesis).hash);
        assert_eq!(outline.hash_origin, arena.get(genesis).hash);
    }
}
