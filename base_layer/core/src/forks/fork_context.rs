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

use quasar_common_types::{BlockHash, ForkId, TxId};
use serde::{Deserialize, Serialize};

use crate::{
    codec::{ByteReader, CodecError, Decodable, Encodable},
    forks::ForkProfile,
};

/// A registered fork: its id (the origin block hash), its anchoring in the parent chain, the
/// fork-creation transaction that carried it, and the declared profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForkContext {
    pub fork_id: ForkId,
    pub parent_id: ForkId,
    /// Hash of the parent-chain block the fork joins at (the origin block's `hash_prev`).
    pub joint: BlockHash,
    pub txid_embedded: TxId,
    pub profile: ForkProfile,
}

impl ForkContext {
    pub fn new(fork_id: ForkId, joint: BlockHash, txid_embedded: TxId, profile: ForkProfile) -> Self {
        Self {
            fork_id,
            parent_id: profile.parent,
            joint,
            txid_embedded,
            profile,
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn joint_height(&self) -> i32 {
        self.profile.joint_height
    }
}

impl Encodable for ForkContext {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.fork_id.encode_into(buf)?;
        self.parent_id.encode_into(buf)?;
        self.joint.encode_into(buf)?;
        self.txid_embedded.encode_into(buf)?;
        self.profile.encode_into(buf)
    }
}

impl Decodable for ForkContext {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            fork_id: reader.read_hash()?,
            parent_id: reader.read_hash()?,
            joint: reader.read_hash()?,
            txid_embedded: reader.read_hash()?,
            profile: ForkProfile::decode_from(reader)?,
        })
    }
}
