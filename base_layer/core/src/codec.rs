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

//! Canonical, deterministic serialization for all consensus-critical records.
//!
//! Multibyte scalars are little-endian, variable-length sequences are prefixed by a compact
//! varint, and map entries are emitted in key order. Two encodings of equal values are
//! byte-identical; hashes and signatures are computed over these bytes.

use std::{collections::BTreeMap, io, io::Read};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use integer_encoding::{VarIntReader, VarIntWriter};
use quasar_common_types::{Hash256, HASH_LENGTH};
use thiserror::Error;

/// Upper bound on any decoded collection length; anything larger is a malformed record.
pub const MAX_DECODE_COUNT: usize = 1 << 22;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Unexpected end of input")]
    UnexpectedEof,
    #[error("Input has {0} undecoded trailing bytes")]
    TrailingBytes(usize),
    #[error("Declared length {0} exceeds the decode limit")]
    LengthOutOfBounds(u64),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A bounds-checked cursor over an encoded record.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof);
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        Ok(LittleEndian::read_i32(self.take(4)?))
    }

    pub fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    pub fn read_hash(&mut self) -> Result<Hash256, CodecError> {
        let mut hash = [0u8; HASH_LENGTH];
        hash.copy_from_slice(self.take(HASH_LENGTH)?);
        Ok(Hash256(hash))
    }

    pub fn read_count(&mut self) -> Result<usize, CodecError> {
        let n: u64 = self.read_varint()?;
        if n as usize > MAX_DECODE_COUNT {
            return Err(CodecError::LengthOutOfBounds(n));
        }
        Ok(n as usize)
    }

    pub fn read_var_bytes(&mut self) -> Result<Vec<u8>, CodecError> {
        let len = self.read_count()?;
        Ok(self.take(len)?.to_vec())
    }
}

// Gives the reader access to the varint decoder, which operates over `io::Read`.
impl Read for ByteReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let n = out.len().min(self.remaining());
        out[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// A value with a canonical byte representation.
pub trait Encodable {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError>;

    fn encoded(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.encode_into(&mut buf);
        buf
    }
}

/// A value that can be reconstructed from its canonical byte representation.
pub trait Decodable: Sized {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError>;

    /// Decode a complete record; trailing bytes are an error.
    fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let value = Self::decode_from(&mut reader)?;
        if !reader.is_empty() {
            return Err(CodecError::TrailingBytes(reader.remaining()));
        }
        Ok(value)
    }
}

pub fn write_count(buf: &mut Vec<u8>, n: usize) -> Result<(), CodecError> {
    buf.write_varint(n as u64)?;
    Ok(())
}

pub fn write_var_bytes(buf: &mut Vec<u8>, bytes: &[u8]) -> Result<(), CodecError> {
    write_count(buf, bytes.len())?;
    buf.extend_from_slice(bytes);
    Ok(())
}

macro_rules! impl_scalar_codec {
    ($ty:ty, $write:ident, $read:ident) => {
        impl Encodable for $ty {
            fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
                buf.$write::<LittleEndian>(*self)?;
                Ok(())
            }
        }
        impl Decodable for $ty {
            fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
                reader.$read()
            }
        }
    };
}

impl_scalar_codec!(u16, write_u16, read_u16);
impl_scalar_codec!(u32, write_u32, read_u32);
impl_scalar_codec!(u64, write_u64, read_u64);
impl_scalar_codec!(i32, write_i32, read_i32);
impl_scalar_codec!(i64, write_i64, read_i64);

impl Encodable for u8 {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.push(*self);
        Ok(())
    }
}

impl Decodable for u8 {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        reader.read_u8()
    }
}

impl Encodable for Hash256 {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        buf.extend_from_slice(self.as_bytes());
        Ok(())
    }
}

impl Decodable for Hash256 {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        reader.read_hash()
    }
}

impl Encodable for String {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        write_var_bytes(buf, self.as_bytes())
    }
}

impl Decodable for String {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let bytes = reader.read_var_bytes()?;
        String::from_utf8(bytes).map_err(|e| CodecError::InvalidValue(e.to_string()))
    }
}

impl<T: Encodable> Encodable for [T] {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        write_count(buf, self.len())?;
        for item in self {
            item.encode_into(buf)?;
        }
        Ok(())
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.as_slice().encode_into(buf)
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let count = reader.read_count()?;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(T::decode_from(reader)?);
        }
        Ok(items)
    }
}

impl<K: Encodable + Ord, V: Encodable> Encodable for BTreeMap<K, V> {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        write_count(buf, self.len())?;
        for (key, value) in self {
            key.encode_into(buf)?;
            value.encode_into(buf)?;
        }
        Ok(())
    }
}

impl<K: Decodable + Ord, V: Decodable> Decodable for BTreeMap<K, V> {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let count = reader.read_count()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = K::decode_from(reader)?;
            let value = V::decode_from(reader)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<A: Encodable, B: Encodable> Encodable for (A, B) {
    fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), CodecError> {
        self.0.encode_into(buf)?;
        self.1.encode_into(buf)
    }
}

impl<A: Decodable, B: Decodable> Decodable for (A, B) {
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok((A::decode_from(reader)?, B::decode_from(reader)?))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scalars_are_little_endian() {
        let mut buf = Vec::new();
        0x1234u16.encode_into(&mut buf).unwrap();
        0x567890abu32.encode_into(&mut buf).unwrap();
        assert_eq!(buf, vec![0x34, 0x12, 0xab, 0x90, 0x78, 0x56]);
        let mut reader = ByteReader::new(&buf);
        assert_eq!(u16::decode_from(&mut reader).unwrap(), 0x1234);
        assert_eq!(u32::decode_from(&mut reader).unwrap(), 0x5678_90ab);
        assert!(reader.is_empty());
    }

    #[test]
    fn signed_round_trip() {
        for v in [i64::MIN, -1, 0, 1, i64::MAX] {
            let bytes = v.encoded();
            assert_eq!(i64::decode(&bytes).unwrap(), v);
        }
    }

    #[test]
    fn vectors_are_length_prefixed() {
        let v: Vec<u8> = vec![9, 8, 7];
        let bytes = v.encoded();
        assert_eq!(bytes, vec![3, 9, 8, 7]);
        assert_eq!(Vec::<u8>::decode(&bytes).unwrap(), v);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = 7u16.encoded();
        bytes.push(0);
        assert!(matches!(u16::decode(&bytes), Err(CodecError::TrailingBytes(1))));
    }

    #[test]
    fn truncated_input_rejected() {
        assert!(matches!(u32::decode(&[1, 2]), Err(CodecError::UnexpectedEof)));
    }

    #[test]
    fn map_entries_are_key_ordered() {
        let mut map = BTreeMap::new();
        map.insert(3u32, 30i64);
        map.insert(1u32, 10i64);
        let bytes = map.encoded();
        let decoded = BTreeMap::<u32, i64>::decode(&bytes).unwrap();
        assert_eq!(decoded, map);
        // key 1 is emitted before key 3
        assert_eq!(bytes[1..5], 1u32.encoded()[..]);
    }

    #[test]
    fn oversize_count_rejected() {
        let mut buf = Vec::new();
        write_count(&mut buf, MAX_DECODE_COUNT + 1).unwrap();
        assert!(matches!(
            Vec::<u8>::decode(&buf),
            Err(CodecError::LengthOutOfBounds(_))
        ));
    }
}
