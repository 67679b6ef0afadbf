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

//! Key layout of the container's store namespaces and the records they hold.
//!
//! Every logical family is distinguished by a single typed prefix byte; per-fork families append
//! the fork id so that one fork's records form one contiguous, ordered key range.

use quasar_common_types::{BlockHash, ForkId, TxId};

use crate::{
    codec::{ByteReader, CodecError, Decodable, Encodable},
    transactions::{Destination, TxOutPoint},
};

pub const PREFIX_BLOCK_OUTLINE: u8 = 0x01;
pub const PREFIX_FORK_CTXT: u8 = 0x02;
pub const PREFIX_FORK_ACTIVE: u8 = 0x03;
pub const PREFIX_TX_INDEX: u8 = 0x04;
pub const PREFIX_UNSPENT: u8 = 0x05;
pub const PREFIX_DELEGATE: u8 = 0x06;
pub const PREFIX_ADDRESS_INFO: u8 = 0x07;

pub fn outline_key(hash: &BlockHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_BLOCK_OUTLINE);
    key.extend_from_slice(hash.as_bytes());
    key
}

pub fn fork_ctxt_key(fork: &ForkId) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_FORK_CTXT);
    key.extend_from_slice(fork.as_bytes());
    key
}

pub fn fork_active_key(fork: &ForkId) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_FORK_ACTIVE);
    key.extend_from_slice(fork.as_bytes());
    key
}

/// Transaction ids carry their timestamp in the high 32 bits, so keying by raw id inside a fork
/// yields the `(txTime, txHash)` order the time-series index wants.
pub fn tx_index_key(fork: &ForkId, txid: &TxId) -> Vec<u8> {
    let mut key = Vec::with_capacity(65);
    key.push(PREFIX_TX_INDEX);
    key.extend_from_slice(fork.as_bytes());
    key.extend_from_slice(txid.as_bytes());
    key
}

pub fn unspent_prefix(fork: &ForkId) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_UNSPENT);
    key.extend_from_slice(fork.as_bytes());
    key
}

pub fn unspent_key(fork: &ForkId, point: &TxOutPoint) -> Vec<u8> {
    let mut key = unspent_prefix(fork);
    key.extend_from_slice(point.txid.as_bytes());
    key.push(point.n);
    key
}

pub fn delegate_key(hash: &BlockHash) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_DELEGATE);
    key.extend_from_slice(hash.as_bytes());
    key
}

pub fn address_info_prefix(fork: &ForkId) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(PREFIX_ADDRESS_INFO);
    key.extend_from_slice(fork.as_bytes());
    key
}

pub fn address_info_key(fork: &ForkId, dest: &Destination) -> Vec<u8> {
    let mut key = address_info_prefix(fork);
    key.extend_from_slice(&dest.encoded());
    key
}

/// Location of one committed transaction: the height of its block and the block's position in the
/// time-series file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxIndexRecord {
    pub height: u32,
    pub file_no: u32,
    pub offset: u32,
}

impl Encodable for TxIndexRecord {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.height.encode_into(buf)?;
        self.file_no.encode_into(buf)?;
        self.offset.encode_into(buf)
    }
}

impl Decodable for TxIndexRecord {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            height: reader.read_u32()?,
            file_no: reader.read_u32()?,
            offset: reader.read_u32()?,
        })
    }
}

/// One delegate enrollment found in a block: the height its CERT anchored at, the enrolling
/// destination, the enrolled stake and the published payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrollEntry {
    pub anchor_height: u32,
    pub dest: Destination,
    pub amount: i64,
    pub data: Vec<u8>,
}

impl Encodable for EnrollEntry {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.anchor_height.encode_into(buf)?;
        self.dest.encode_into(buf)?;
        self.amount.encode_into(buf)?;
        self.data.encode_into(buf)
    }
}

impl Decodable for EnrollEntry {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            anchor_height: reader.read_u32()?,
            dest: Destination::decode_from(reader)?,
            amount: reader.read_i64()?,
            data: reader.read_var_bytes()?,
        })
    }
}

/// Aggregated delegate activity of one primary block, keyed by the block hash.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegateBlockRecord {
    pub enrolls: Vec<EnrollEntry>,
}

impl Encodable for DelegateBlockRecord {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.enrolls.encode_into(buf)
    }
}

impl Decodable for DelegateBlockRecord {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            enrolls: Vec::<EnrollEntry>::decode_from(reader)?,
        })
    }
}

/// Invite relation of one address on a DeFi fork: its inviting parent, the root of the parent's
/// invite chain at insertion time and the transaction that established the relation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrInfo {
    pub parent: Destination,
    pub root: Destination,
    pub txid: TxId,
}

impl Encodable for AddrInfo {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.parent.encode_into(buf)?;
        self.root.encode_into(buf)?;
        self.txid.encode_into(buf)
    }
}

impl Decodable for AddrInfo {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            parent: Destination::decode_from(reader)?,
            root: Destination::decode_from(reader)?,
            txid: reader.read_hash()?,
        })
    }
}
