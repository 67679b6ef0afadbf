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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyValStoreError {
    #[error("The specified key did not exist in the store")]
    KeyNotFound,
    #[error("The specified key already exists in the store")]
    KeyExists,
    #[error("An error occurred with the underlying data store implementation: {0}")]
    DatabaseError(String),
    #[error("An error occurred during serialization: {0}")]
    SerializationError(String),
    #[error("The store is poisoned and can no longer be accessed")]
    PoisonedAccess,
}

/// Signal returned by a [`KeyValStore::for_each_prefix`] visitor after each record.
pub enum IterationResult {
    Continue,
    Break,
}

/// A single pending mutation inside a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// An ordered set of mutations that a backend must apply atomically: either every operation is
/// visible after [`KeyValStore::commit`] returns, or none is. This is the transaction boundary the
/// chain-state layer builds its crash-safety argument on.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put { key, value });
        self
    }

    pub fn delete(&mut self, key: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Delete { key });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }
}

/// General CRUD behaviour of a keyed byte-record store.
///
/// Record families (fork contexts, block outlines, unspent outputs, ...) are logical namespaces
/// distinguished by a typed key prefix chosen by the caller; prefixes must be disjoint.
/// `for_each_prefix` yields records in lexicographic key order, which namespaced callers rely on
/// for ordered walks.
pub trait KeyValStore: Send + Sync {
    /// Retrieve the value stored against `key`, or `None` if the key is absent.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KeyValStoreError>;

    /// Store `value` against `key`. When `overwrite` is false and the key exists, the call fails
    /// with [`KeyValStoreError::KeyExists`] and the stored value is untouched.
    fn put(&self, key: &[u8], value: Vec<u8>, overwrite: bool) -> Result<(), KeyValStoreError>;

    /// Returns true if `key` is present in the store.
    fn exists(&self, key: &[u8]) -> Result<bool, KeyValStoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> Result<(), KeyValStoreError>;

    /// Apply every operation in `batch` atomically.
    fn commit(&self, batch: WriteBatch) -> Result<(), KeyValStoreError>;

    /// Visit every record whose key starts with `prefix`, in lexicographic key order, until the
    /// visitor returns [`IterationResult::Break`] or the records are exhausted.
    fn for_each_prefix(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> IterationResult,
    ) -> Result<(), KeyValStoreError>;

    /// Number of records currently stored.
    fn size(&self) -> Result<usize, KeyValStoreError>;
}
