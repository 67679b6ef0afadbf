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

use std::collections::BTreeMap;

use quasar_common_types::{Hash256, HASH_LENGTH};
use sha2::{Digest, Sha256};

use crate::{
    codec::{ByteReader, CodecError, Decodable, Encodable},
    delegates::DelegateEnrolled,
    error::ChainError,
    transactions::Destination,
};

/// The stake publication carried in a DPoS block's proof payload: the claimed agreement digest,
/// the total published weight (also the chain-trust contribution, so it leads the payload) and
/// the publishing delegates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DelegateProof {
    pub weight: u8,
    pub agreement: Hash256,
    pub publish: Vec<Destination>,
}

impl DelegateProof {
    pub fn load(proof: &[u8]) -> Result<Self, CodecError> {
        Self::decode(proof)
    }
}

impl Encodable for DelegateProof {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.push(self.weight);
        self.agreement.encode_into(buf)?;
        self.publish.encode_into(buf)
    }
}

impl Decodable for DelegateProof {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            weight: reader.read_u8()?,
            agreement: reader.read_hash()?,
            publish: Vec::<Destination>::decode_from(reader)?,
        })
    }
}

/// Extraction of an agreement from a block's proof payload. Implementations must be
/// deterministic: the same enrollment snapshot and proof bytes always yield the same outcome.
pub trait ProofVerifier {
    /// Verify `proof` and extract `(agreement, weight, ballot_weights)`. A proof publishing
    /// nothing (zero weight, zero agreement) denotes a proof-of-work round and yields an empty
    /// ballot map.
    fn verify_proof(
        &self,
        proof: &[u8],
    ) -> Result<(Hash256, u32, BTreeMap<Destination, u32>), ChainError>;
}

/// The shipped verifier: recomputes the agreement digest from the enrollment snapshot the proof
/// claims to publish for, and rejects proofs whose digest or weight disagree.
pub struct DelegateVerifier<'a> {
    enrolled: &'a DelegateEnrolled,
}

impl<'a> DelegateVerifier<'a> {
    pub fn new(enrolled: &'a DelegateEnrolled) -> Self {
        Self { enrolled }
    }

    /// The agreement digest a set of publishers commits to: the hash over each publisher's
    /// destination and enrollment payload, in publication order.
    pub fn compute_agreement(enrolled: &DelegateEnrolled, publish: &[Destination]) -> Hash256 {
        let mut hasher = Sha256::new();
        for dest in publish {
            hasher.update(dest.encoded());
            if let Some(data) = enrolled.map_enroll_data.get(dest) {
                hasher.update(data);
            }
        }
        let digest = hasher.finalize();
        let mut hash = [0u8; HASH_LENGTH];
        hash.copy_from_slice(digest.as_slice());
        Hash256(hash)
    }
}

impl ProofVerifier for DelegateVerifier<'_> {
    fn verify_proof(
        &self,
        proof: &[u8],
    ) -> Result<(Hash256, u32, BTreeMap<Destination, u32>), ChainError> {
        let parsed = DelegateProof::load(proof).map_err(|_| ChainError::BlockProofOfStakeInvalid)?;
        if parsed.weight == 0 && parsed.agreement.is_zero() {
            // nothing published: the round falls back to proof of work
            return Ok((Hash256::zero(), 0, BTreeMap::new()));
        }

        let mut ballot = BTreeMap::new();
        let mut weight_sum: u64 = 0;
        for dest in &parsed.publish {
            let enrolled_weight = match self.enrolled.map_weight.get(dest) {
                Some(w) => *w,
                None => return Err(ChainError::BlockProofOfStakeInvalid),
            };
            if ballot.insert(dest.clone(), enrolled_weight).is_some() {
                return Err(ChainError::BlockProofOfStakeInvalid);
            }
            weight_sum += u64::from(enrolled_weight);
        }

        let expected = Self::compute_agreement(self.enrolled, &parsed.publish);
        if expected != parsed.agreement {
            return Err(ChainError::BlockProofOfStakeInvalid);
        }
        if u64::from(parsed.weight) != weight_sum.min(u64::from(u8::MAX)) {
            return Err(ChainError::BlockProofOfStakeInvalid);
        }

        Ok((parsed.agreement, weight_sum as u32, ballot))
    }
}
