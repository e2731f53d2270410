use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info};
use xdedup_storage::StorageBackend;

use crate::error::Result;

/// Storage key of the persisted index snapshot.
pub const INDEX_KEY: &str = "index/global";

/// Persistent key → value store holding blinded index entries.
///
/// Lives outside the trusted boundary and only ever sees opaque keys and
/// values. Append-only: inserting an existing key keeps the first value.
pub trait IndexStore: Send + Sync {
    fn query_one(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Look up many keys in one round-trip. Must return one result per key,
    /// in request order.
    fn query_batch(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>>;

    fn insert_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()>;

    /// Write pending inserts to durable storage.
    fn persist(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory map persisted as one msgpack snapshot through a storage backend.
pub struct KvIndexStore {
    storage: Arc<dyn StorageBackend>,
    entries: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    dirty: AtomicBool,
}

impl KvIndexStore {
    /// Load the snapshot at [`INDEX_KEY`], or start empty.
    pub fn open(storage: Arc<dyn StorageBackend>) -> Result<Self> {
        let entries: HashMap<Vec<u8>, Vec<u8>> = match storage.get(INDEX_KEY)? {
            Some(bytes) => {
                let pairs: Vec<(Vec<u8>, Vec<u8>)> = rmp_serde::from_slice(&bytes)?;
                pairs.into_iter().collect()
            }
            None => HashMap::new(),
        };
        debug!(entries = entries.len(), "loaded global index");
        Ok(Self {
            storage,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        })
    }
}

impl IndexStore for KvIndexStore {
    fn query_one(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().unwrap().get(key).cloned())
    }

    fn query_batch(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        let entries = self.entries.read().unwrap();
        Ok(keys.iter().map(|k| entries.get(k).cloned()).collect())
    }

    fn insert_batch(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut entries = self.entries.write().unwrap();
        for (key, value) in batch {
            entries.entry(key).or_insert(value);
        }
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        let bytes = {
            let entries = self.entries.read().unwrap();
            let pairs: Vec<(&Vec<u8>, &Vec<u8>)> = entries.iter().collect();
            rmp_serde::to_vec(&pairs)?
        };
        if let Err(e) = self.storage.put(INDEX_KEY, &bytes) {
            self.dirty.store(true, Ordering::Release);
            return Err(e);
        }
        info!(bytes = bytes.len(), entries = self.len(), "persisted global index");
        Ok(())
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdedup_storage::MemoryBackend;

    fn backend() -> Arc<dyn StorageBackend> {
        Arc::new(MemoryBackend::new())
    }

    #[test]
    fn batch_results_follow_request_order() {
        let store = KvIndexStore::open(backend()).unwrap();
        store
            .insert_batch(vec![(b"a".to_vec(), b"1".to_vec()), (b"c".to_vec(), b"3".to_vec())])
            .unwrap();
        let keys = vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()];
        let results = store.query_batch(&keys).unwrap();
        assert_eq!(
            results,
            vec![Some(b"3".to_vec()), None, Some(b"1".to_vec())]
        );
    }

    #[test]
    fn inserts_are_append_only() {
        let store = KvIndexStore::open(backend()).unwrap();
        store.insert_batch(vec![(b"k".to_vec(), b"first".to_vec())]).unwrap();
        store.insert_batch(vec![(b"k".to_vec(), b"second".to_vec())]).unwrap();
        assert_eq!(store.query_one(b"k").unwrap().unwrap(), b"first");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn persist_and_reopen() {
        let storage = backend();
        let store = KvIndexStore::open(storage.clone()).unwrap();
        store.insert_batch(vec![(vec![1, 2], vec![3, 4])]).unwrap();
        store.persist().unwrap();

        let reopened = KvIndexStore::open(storage.clone()).unwrap();
        assert_eq!(reopened.query_one(&[1, 2]).unwrap(), Some(vec![3, 4]));
        // Nothing new to write: a clean store does not touch storage.
        storage.delete(INDEX_KEY).unwrap();
        reopened.persist().unwrap();
        assert!(!storage.exists(INDEX_KEY).unwrap());
    }
}
