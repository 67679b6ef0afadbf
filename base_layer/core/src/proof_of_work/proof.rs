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

use quasar_common_types::{BlockHash, Hash256};

use crate::codec::{ByteReader, CodecError, Decodable, Encodable};

/// The compact hash-work record at the front of a PoW block's proof payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HashWorkProof {
    pub algo: u8,
    pub bits: u8,
    pub nonce: u64,
}

impl HashWorkProof {
    pub const SERIALIZED_SIZE: usize = 10;

    /// Parse the record off the front of a proof payload; trailing bytes are permitted.
    pub fn load(proof: &[u8]) -> Result<Self, CodecError> {
        if proof.len() < Self::SERIALIZED_SIZE {
            return Err(CodecError::UnexpectedEof);
        }
        let mut reader = ByteReader::new(&proof[..Self::SERIALIZED_SIZE]);
        Self::decode_from(&mut reader)
    }
}

impl Encodable for HashWorkProof {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.push(self.algo);
        buf.push(self.bits);
        self.nonce.encode_into(buf)
    }
}

impl Decodable for HashWorkProof {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            algo: reader.read_u8()?,
            bits: reader.read_u8()?,
            nonce: reader.read_u64()?,
        })
    }
}

/// The proof payload of a subsidiary-fork block: the primary-chain agreement it piggybacks on and
/// the primary block that anchors it in time. The weight byte leads the payload; it doubles as
/// the block's trust contribution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PiggybackProof {
    pub weight: u8,
    pub agreement: Hash256,
    pub ref_block: BlockHash,
}

impl PiggybackProof {
    pub fn load(proof: &[u8]) -> Result<Self, CodecError> {
        Self::decode(proof)
    }
}

impl Encodable for PiggybackProof {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.push(self.weight);
        self.agreement.encode_into(buf)?;
        self.ref_block.encode_into(buf)
    }
}

impl Decodable for PiggybackProof {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            weight: reader.read_u8()?,
            agreement: reader.read_hash()?,
            ref_block: reader.read_hash()?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn hash_work_round_trip() {
        let proof = HashWorkProof {
            algo: 1,
            bits: 24,
            nonce: 0xdead_beef,
        };
        let mut bytes = proof.encoded();
        assert_eq!(bytes.len(), HashWorkProof::SERIALIZED_SIZE);
        // a miner may append arbitrary padding after the compact record
        bytes.extend_from_slice(&[0xff; 4]);
        assert_eq!(HashWorkProof::load(&bytes).unwrap(), proof);
    }

    #[test]
    fn short_payload_rejected() {
        assert!(HashWorkProof::load(&[1, 2, 3]).is_err());
    }

    #[test]
    fn piggyback_round_trip() {
        let proof = PiggybackProof {
            weight: 11,
            agreement: Hash256([4u8; 32]),
            ref_block: Hash256([5u8; 32]).with_height(77),
        };
        assert_eq!(PiggybackProof::load(&proof.encoded()).unwrap(), proof);
    }
}
