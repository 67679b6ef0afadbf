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

use quasar_common_types::{Hash256, TxId, HASH_LENGTH};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    codec::{ByteReader, CodecError, Decodable, Encodable},
    transactions::Destination,
};

/// Transaction type tags. The high byte groups related kinds; mint transactions occupy the
/// 0x01xx..0x03xx range and enrollments sit apart at 0xff00.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum TxType {
    Token = 0x0000,
    MintGenesis = 0x0100,
    MintStake = 0x0200,
    MintWork = 0x0300,
    Fork = 0x0400,
    Cert = 0xff00,
}

impl TxType {
    pub fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0x0000 => Some(TxType::Token),
            0x0100 => Some(TxType::MintGenesis),
            0x0200 => Some(TxType::MintStake),
            0x0300 => Some(TxType::MintWork),
            0x0400 => Some(TxType::Fork),
            0xff00 => Some(TxType::Cert),
            _ => None,
        }
    }

    pub fn is_mint(&self) -> bool {
        matches!(self, TxType::MintGenesis | TxType::MintStake | TxType::MintWork)
    }
}

/// A reference to a specific output of a prior transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxOutPoint {
    pub txid: TxId,
    pub n: u8,
}

impl TxOutPoint {
    pub fn new(txid: TxId, n: u8) -> Self {
        Self { txid, n }
    }
}

impl Encodable for TxOutPoint {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.txid.encode_into(buf)?;
        buf.push(self.n);
        Ok(())
    }
}

impl Decodable for TxOutPoint {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            txid: reader.read_hash()?,
            n: reader.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxIn {
    pub prevout: TxOutPoint,
}

impl Encodable for TxIn {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.prevout.encode_into(buf)
    }
}

impl Decodable for TxIn {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            prevout: TxOutPoint::decode_from(reader)?,
        })
    }
}

/// An unspent output: who it pays, how much, when the paying tx was timestamped and until which
/// block height it is locked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub dest_to: Destination,
    pub amount: i64,
    pub tx_time: u32,
    pub lock_until: u32,
}

impl TxOut {
    pub fn is_null(&self) -> bool {
        self.amount == 0 && self.dest_to.is_null()
    }
}

impl Encodable for TxOut {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.dest_to.encode_into(buf)?;
        self.amount.encode_into(buf)?;
        self.tx_time.encode_into(buf)?;
        self.lock_until.encode_into(buf)
    }
}

impl Decodable for TxOut {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            dest_to: Destination::decode_from(reader)?,
            amount: reader.read_i64()?,
            tx_time: reader.read_u32()?,
            lock_until: reader.read_u32()?,
        })
    }
}

/// A coin-addressed transaction.
///
/// Output 0 is always the `send_to` output; output 1, when the inputs carry more value than
/// `amount + tx_fee`, is the change back to the input owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u16,
    pub tx_type: u16,
    pub timestamp: u32,
    pub lock_until: u32,
    pub hash_anchor: Hash256,
    pub inputs: Vec<TxIn>,
    pub send_to: Destination,
    pub amount: i64,
    pub tx_fee: i64,
    pub data: Vec<u8>,
    pub sig_data: Vec<u8>,
}

impl Default for Transaction {
    fn default() -> Self {
        Self {
            version: 1,
            tx_type: TxType::Token as u16,
            timestamp: 0,
            lock_until: 0,
            hash_anchor: Hash256::zero(),
            inputs: Vec::new(),
            send_to: Destination::Null,
            amount: 0,
            tx_fee: 0,
            data: Vec::new(),
            sig_data: Vec::new(),
        }
    }
}

impl Transaction {
    pub fn tx_type(&self) -> Option<TxType> {
        TxType::from_raw(self.tx_type)
    }

    pub fn is_null(&self) -> bool {
        self.send_to.is_null() && self.amount == 0
    }

    pub fn is_mint(&self) -> bool {
        self.tx_type().map(|t| t.is_mint()).unwrap_or(false)
    }

    pub fn is_cert(&self) -> bool {
        self.tx_type == TxType::Cert as u16
    }

    /// The transaction id: the hash of the canonical serialization minus the signature, with the
    /// high 32 bits replaced by the transaction timestamp so that time-ordered indexes can be
    /// keyed straight off the id.
    pub fn get_hash(&self) -> TxId {
        let digest = Sha256::digest(&self.signing_bytes());
        let mut hash = [0u8; HASH_LENGTH];
        hash.copy_from_slice(digest.as_slice());
        Hash256(hash).with_height(self.timestamp)
    }

    /// The bytes covered by `sig_data`.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.encode_without_signature(&mut buf);
        buf
    }

    fn encode_without_signature(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.version.encode_into(buf)?;
        self.tx_type.encode_into(buf)?;
        self.timestamp.encode_into(buf)?;
        self.lock_until.encode_into(buf)?;
        self.hash_anchor.encode_into(buf)?;
        self.inputs.encode_into(buf)?;
        self.send_to.encode_into(buf)?;
        self.amount.encode_into(buf)?;
        self.tx_fee.encode_into(buf)?;
        self.data.encode_into(buf)
    }

    /// Number of outputs this transaction creates given the total input value: the `send_to`
    /// output plus a change output when value remains.
    pub fn get_change(&self, value_in: i64) -> i64 {
        value_in - self.amount - self.tx_fee
    }

    /// Materialize output `n` (0 = send, 1 = change). The change output pays the input owner.
    pub fn get_output(&self, n: u8, dest_in: &Destination, value_in: i64) -> Option<TxOut> {
        match n {
            0 => Some(TxOut {
                dest_to: self.send_to.clone(),
                amount: self.amount,
                tx_time: self.timestamp,
                lock_until: self.lock_until,
            }),
            1 => {
                let change = self.get_change(value_in);
                if change > 0 && !dest_in.is_null() {
                    Some(TxOut {
                        dest_to: dest_in.clone(),
                        amount: change,
                        tx_time: self.timestamp,
                        lock_until: 0,
                    })
                } else {
                    None
                }
            },
            _ => None,
        }
    }

    pub fn serialized_size(&self) -> usize {
        self.encoded().len()
    }
}

impl Encodable for Transaction {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.encode_without_signature(buf)?;
        self.sig_data.encode_into(buf)
    }
}

impl Decodable for Transaction {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            version: reader.read_u16()?,
            tx_type: reader.read_u16()?,
            timestamp: reader.read_u32()?,
            lock_until: reader.read_u32()?,
            hash_anchor: reader.read_hash()?,
            inputs: Vec::<TxIn>::decode_from(reader)?,
            send_to: Destination::decode_from(reader)?,
            amount: reader.read_i64()?,
            tx_fee: reader.read_i64()?,
            data: reader.read_var_bytes()?,
            sig_data: reader.read_var_bytes()?,
        })
    }
}

/// The recorded state of one spent input, kept so a transaction can be rolled back without
/// consulting the spending chain again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInContext {
    pub amount: i64,
    pub tx_time: u32,
    pub lock_until: u32,
}

impl From<&TxOut> for TxInContext {
    fn from(out: &TxOut) -> Self {
        Self {
            amount: out.amount,
            tx_time: out.tx_time,
            lock_until: out.lock_until,
        }
    }
}

impl Encodable for TxInContext {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.amount.encode_into(buf)?;
        self.tx_time.encode_into(buf)?;
        self.lock_until.encode_into(buf)
    }
}

impl Decodable for TxInContext {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            amount: reader.read_i64()?,
            tx_time: reader.read_u32()?,
            lock_until: reader.read_u32()?,
        })
    }
}

/// Everything the validators need to know about the inputs of one transaction: the single owner
/// all inputs resolve to and the recorded value of each input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxContext {
    pub dest_in: Destination,
    pub inputs: Vec<TxInContext>,
}

impl TxContext {
    pub fn get_value_in(&self) -> i64 {
        self.inputs.iter().map(|i| i.amount).sum()
    }
}

impl Encodable for TxContext {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.dest_in.encode_into(buf)?;
        self.inputs.encode_into(buf)
    }
}

impl Decodable for TxContext {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            dest_in: Destination::decode_from(reader)?,
            inputs: Vec::<TxInContext>::decode_from(reader)?,
        })
    }
}
