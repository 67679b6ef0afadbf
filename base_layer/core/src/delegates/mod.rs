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

//! The delegate enrollment and agreement engine: snapshots of enrollment windows, the agreement a
//! stake proof publishes, and the deterministic ballot derivation over them.

mod ballot;
mod verifier;

use std::collections::BTreeMap;

pub use ballot::get_delegated_ballot;
use quasar_common_types::Hash256;
use serde::{Deserialize, Serialize};
pub use verifier::{DelegateProof, DelegateVerifier, ProofVerifier};

use crate::transactions::Destination;

/// The aggregated enrollment state at one block: which destinations enrolled inside the window,
/// their ballot weight, their published enrollment payloads and their stake amounts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateEnrolled {
    pub map_weight: BTreeMap<Destination, u32>,
    pub map_enroll_data: BTreeMap<Destination, Vec<u8>>,
    pub vec_amount: Vec<(Destination, i64)>,
}

impl DelegateEnrolled {
    pub fn is_empty(&self) -> bool {
        self.map_weight.is_empty()
    }

    pub fn clear(&mut self) {
        self.map_weight.clear();
        self.map_enroll_data.clear();
        self.vec_amount.clear();
    }
}

/// The deterministic ballot outcome derived from an enrollment snapshot and a block's stake
/// proof. An empty ballot means the slot falls back to proof of work.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateAgreement {
    pub agreement: Hash256,
    pub weight: u32,
    pub ballot: Vec<Destination>,
}

impl DelegateAgreement {
    pub fn is_proof_of_work(&self) -> bool {
        self.ballot.is_empty()
    }

    /// The delegate elected for rotation slot `index`.
    pub fn get_ballot(&self, index: usize) -> Destination {
        if self.ballot.is_empty() {
            return Destination::Null;
        }
        self.ballot[index % self.ballot.len()].clone()
    }

    pub fn clear(&mut self) {
        self.agreement = Hash256::zero();
        self.weight = 0;
        self.ballot.clear();
    }
}
