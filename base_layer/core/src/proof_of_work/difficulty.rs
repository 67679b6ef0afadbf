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

use quasar_common_types::ChainTrust;
use serde::{Deserialize, Serialize};

/// The mining algorithms a primary-chain PoW block may carry. Only one hash algorithm ships; the
/// tag keeps the proof format open for additional ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PowAlgorithm {
    Sha256d = 1,
}

impl PowAlgorithm {
    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(PowAlgorithm::Sha256d),
            _ => None,
        }
    }
}

/// The 256-bit target a block hash must not exceed, given the required number of leading zero
/// bits.
pub fn target_from_bits(bits: u8) -> ChainTrust {
    ChainTrust::MAX >> bits
}

/// The trust weight a PoW block contributes to its chain:
/// `trust = 2^256 / (target + 1) = !target / (target + 1) + 1`.
pub fn block_trust_from_bits(bits: u8) -> ChainTrust {
    let target = target_from_bits(bits);
    if target == ChainTrust::MAX {
        return ChainTrust::one();
    }
    (!target) / (target + ChainTrust::one()) + ChainTrust::one()
}
