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

use std::fmt::{Display, Formatter};

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use quasar_common_types::{Hash256, HASH_LENGTH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::codec::{ByteReader, CodecError, Decodable, Encodable};

const PREFIX_NULL: u8 = 0x00;
const PREFIX_PUBKEY: u8 = 0x01;
const PREFIX_TEMPLATE: u8 = 0x02;

/// The addressee of a transaction output: a raw signing key, a template id, or null (no owner).
///
/// A template id commits to the template's owner key: `template_id = H(owner_pubkey)`. Template
/// signatures carry the owner key alongside the signature so that the commitment can be checked
/// without a template store.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Destination {
    #[default]
    Null,
    PubKey([u8; 32]),
    TemplateId(Hash256),
}

impl Destination {
    pub fn template_for(owner_pubkey: &[u8; 32]) -> Self {
        let digest = Sha256::digest(owner_pubkey);
        let mut id = [0u8; HASH_LENGTH];
        id.copy_from_slice(digest.as_slice());
        Destination::TemplateId(Hash256(id))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Destination::Null)
    }

    pub fn is_pubkey(&self) -> bool {
        matches!(self, Destination::PubKey(_))
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Destination::TemplateId(_))
    }

    /// Verify `sig_data` over `msg` against this destination.
    ///
    /// For a raw key the signature bytes are a detached ed25519 signature. For a template the
    /// signature bytes are `owner_pubkey(32) || signature(64)` and the owner key must hash to the
    /// template id. Null destinations own nothing and verify nothing.
    pub fn verify_signature(&self, msg: &[u8], sig_data: &[u8]) -> bool {
        match self {
            Destination::Null => false,
            Destination::PubKey(pubkey) => verify_ed25519(pubkey, msg, sig_data),
            Destination::TemplateId(id) => {
                if sig_data.len() < 32 {
                    return false;
                }
                let mut owner = [0u8; 32];
                owner.copy_from_slice(&sig_data[..32]);
                if Destination::template_for(&owner) != Destination::TemplateId(*id) {
                    return false;
                }
                verify_ed25519(&owner, msg, &sig_data[32..])
            },
        }
    }
}

fn verify_ed25519(pubkey: &[u8; 32], msg: &[u8], sig: &[u8]) -> bool {
    let key = match VerifyingKey::from_bytes(pubkey) {
        Ok(k) => k,
        Err(_) => return false,
    };
    let sig = match Signature::from_slice(sig) {
        Ok(s) => s,
        Err(_) => return false,
    };
    key.verify(msg, &sig).is_ok()
}

impl Encodable for Destination {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        match self {
            Destination::Null => {
                buf.push(PREFIX_NULL);
                buf.extend_from_slice(&[0u8; 32]);
            },
            Destination::PubKey(pubkey) => {
                buf.push(PREFIX_PUBKEY);
                buf.extend_from_slice(pubkey);
            },
            Destination::TemplateId(id) => {
                buf.push(PREFIX_TEMPLATE);
                buf.extend_from_slice(id.as_bytes());
            },
        }
        Ok(())
    }
}

impl Decodable for Destination {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let prefix = reader.read_u8()?;
        let body = reader.read_hash()?;
        match prefix {
            PREFIX_NULL => Ok(Destination::Null),
            PREFIX_PUBKEY => Ok(Destination::PubKey(body.0)),
            PREFIX_TEMPLATE => Ok(Destination::TemplateId(body)),
            other => Err(CodecError::InvalidValue(format!(
                "unknown destination prefix {other}"
            ))),
        }
    }
}

impl Display for Destination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Destination::Null => write!(f, "null"),
            Destination::PubKey(pubkey) => write!(f, "pub:{}", hex::encode(pubkey)),
            Destination::TemplateId(id) => write!(f, "tpl:{id}"),
        }
    }
}
