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

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::{Arc, RwLock},
};

use crate::key_val_store::{IterationResult, KeyValStore, KeyValStoreError, WriteBatch, WriteOp};

/// An ordered, fully in-process [`KeyValStore`] backend.
///
/// All mutations for a [`WriteBatch`] are applied under a single writer guard, so a batch is
/// atomic with respect to every other reader and writer. Cloning the store clones the handle, not
/// the data.
#[derive(Clone, Default)]
pub struct MemoryKeyValStore {
    inner: Arc<RwLock<BTreeMap<Vec<u8>, Vec<u8>>>>,
}

impl MemoryKeyValStore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl KeyValStore for MemoryKeyValStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KeyValStoreError> {
        let guard = self.inner.read().map_err(|_| KeyValStoreError::PoisonedAccess)?;
        Ok(guard.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: Vec<u8>, overwrite: bool) -> Result<(), KeyValStoreError> {
        let mut guard = self.inner.write().map_err(|_| KeyValStoreError::PoisonedAccess)?;
        if !overwrite && guard.contains_key(key) {
            return Err(KeyValStoreError::KeyExists);
        }
        guard.insert(key.to_vec(), value);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KeyValStoreError> {
        let guard = self.inner.read().map_err(|_| KeyValStoreError::PoisonedAccess)?;
        Ok(guard.contains_key(key))
    }

    fn delete(&self, key: &[u8]) -> Result<(), KeyValStoreError> {
        let mut guard = self.inner.write().map_err(|_| KeyValStoreError::PoisonedAccess)?;
        guard.remove(key);
        Ok(())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), KeyValStoreError> {
        let mut guard = self.inner.write().map_err(|_| KeyValStoreError::PoisonedAccess)?;
        for op in batch.into_ops() {
            match op {
                WriteOp::Put { key, value } => {
                    guard.insert(key, value);
                },
                WriteOp::Delete { key } => {
                    guard.remove(&key);
                },
            }
        }
        Ok(())
    }

    fn for_each_prefix(
        &self,
        prefix: &[u8],
        f: &mut dyn FnMut(&[u8], &[u8]) -> IterationResult,
    ) -> Result<(), KeyValStoreError> {
        let guard = self.inner.read().map_err(|_| KeyValStoreError::PoisonedAccess)?;
        let range = guard.range::<Vec<u8>, _>((Bound::Included(prefix.to_vec()), Bound::Unbounded));
        for (key, value) in range {
            if !key.starts_with(prefix) {
                break;
            }
            if let IterationResult::Break = f(key, value) {
                break;
            }
        }
        Ok(())
    }

    fn size(&self) -> Result<usize, KeyValStoreError> {
        let guard = self.inner.read().map_err(|_| KeyValStoreError::PoisonedAccess)?;
        Ok(guard.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn put_get_delete() {
        let store = MemoryKeyValStore::new();
        store.put(b"a", vec![1], true).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(vec![1]));
        assert!(store.exists(b"a").unwrap());
        assert!(matches!(
            store.put(b"a", vec![2], false),
            Err(KeyValStoreError::KeyExists)
        ));
        store.put(b"a", vec![2], true).unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(vec![2]));
        store.delete(b"a").unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
    }

    #[test]
    fn batch_is_atomic_and_ordered() {
        let store = MemoryKeyValStore::new();
        let mut batch = WriteBatch::new();
        batch.put(b"p/1".to_vec(), vec![1]);
        batch.put(b"p/2".to_vec(), vec![2]);
        batch.put(b"q/1".to_vec(), vec![3]);
        batch.delete(b"p/2".to_vec());
        store.commit(batch).unwrap();

        let mut seen = Vec::new();
        store
            .for_each_prefix(b"p/", &mut |key, value| {
                seen.push((key.to_vec(), value.to_vec()));
                IterationResult::Continue
            })
            .unwrap();
        assert_eq!(seen, vec![(b"p/1".to_vec(), vec![1])]);
        assert_eq!(store.size().unwrap(), 2);
    }

    #[test]
    fn prefix_walk_is_lexicographic() {
        let store = MemoryKeyValStore::new();
        for k in [&b"k/03"[..], b"k/01", b"k/02", b"l/00"] {
            store.put(k, k.to_vec(), true).unwrap();
        }
        let mut keys = Vec::new();
        store
            .for_each_prefix(b"k/", &mut |key, _| {
                keys.push(key.to_vec());
                IterationResult::Continue
            })
            .unwrap();
        assert_eq!(keys, vec![b"k/01".to_vec(), b"k/02".to_vec(), b"k/03".to_vec()]);
    }
}
