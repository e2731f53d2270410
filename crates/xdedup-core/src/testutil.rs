//! Shared fixtures for unit and integration tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use xdedup_crypto::key::SessionKeys;
use xdedup_storage::{MemoryBackend, StorageBackend};

use crate::config::{BoundaryMode, ChunkerConfig, XdedupConfig};
use crate::error::Result;
use crate::index::IndexStore;
use crate::site::Site;

/// Fixed key material so independent sites agree on fingerprints.
pub fn test_keys() -> SessionKeys {
    SessionKeys::derive(&[0x5A; 32])
}

/// Defaults with small chunks and containers so tests exercise sealing.
pub fn small_config() -> XdedupConfig {
    let mut config = XdedupConfig::default();
    config.chunker = ChunkerConfig {
        min_size: 512,
        avg_size: 2048,
        max_size: 8192,
    };
    config.container.max_container_size = 64 * 1024;
    config.container.max_meta_size = 64 * 1024;
    config.cache.capacity = 4096;
    config.pipeline.batch_size = 16;
    config.pipeline.queue_capacity = 4;
    config.pipeline.index_batch_size = 8;
    config.security.boundary = BoundaryMode::InProcess;
    config
}

/// A site on a fresh in-memory backend.
pub fn memory_site(config: XdedupConfig) -> Site {
    open_site(Arc::new(MemoryBackend::new()), config)
}

pub fn open_site(storage: Arc<dyn StorageBackend>, config: XdedupConfig) -> Site {
    Site::open(storage, config, test_keys()).expect("failed to open test site")
}

/// Deterministic pseudo-random bytes.
pub fn pseudo_random(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed ^ 0x9E37_79B9_7F4A_7C15;
    let mut out = Vec::with_capacity(len + 8);
    while out.len() < len {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        out.extend_from_slice(&state.to_le_bytes());
    }
    out.truncate(len);
    out
}

/// Index wrapper that counts round-trips and can be told to lose a result.
pub struct InstrumentedIndex {
    inner: Arc<dyn IndexStore>,
    single_lookups: AtomicUsize,
    batch_lookups: AtomicUsize,
    drop_batch_result: AtomicBool,
}

impl InstrumentedIndex {
    pub fn new(inner: Arc<dyn IndexStore>) -> Self {
        Self {
            inner,
            single_lookups: AtomicUsize::new(0),
            batch_lookups: AtomicUsize::new(0),
            drop_batch_result: AtomicBool::new(false),
        }
    }

    /// Make every following batch lookup return one result too few.
    pub fn drop_batch_results(&self) {
        self.drop_batch_result.store(true, Ordering::SeqCst);
    }

    pub fn single_lookups(&self) -> usize {
        self.single_lookups.load(Ordering::SeqCst)
    }

    pub fn batch_lookups(&self) -> usize {
        self.batch_lookups.load(Ordering::SeqCst)
    }
}

impl IndexStore for InstrumentedIndex {
    fn query_one(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.single_lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.query_one(key)
    }

    fn query_batch(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        self.batch_lookups.fetch_add(1, Ordering::SeqCst);
        let mut results = self.inner.query_batch(keys)?;
        if self.drop_batch_result.load(Ordering::SeqCst) {
            results.pop();
        }
        Ok(results)
    }

    fn insert_batch(&self, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
        self.inner.insert_batch(entries)
    }

    fn persist(&self) -> Result<()> {
        self.inner.persist()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Storage wrapper that counts reads of keys under a prefix.
pub struct CountingBackend {
    inner: Arc<dyn StorageBackend>,
    prefix: &'static str,
    reads: AtomicUsize,
}

impl CountingBackend {
    pub fn new(inner: Arc<dyn StorageBackend>, prefix: &'static str) -> Self {
        Self {
            inner,
            prefix,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.reads.store(0, Ordering::SeqCst);
    }

    fn count(&self, key: &str) {
        if key.starts_with(self.prefix) {
            self.reads.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl StorageBackend for CountingBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.count(key);
        self.inner.get(key)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        self.inner.put(key, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        self.inner.exists(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.inner.list(prefix)
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        self.count(key);
        self.inner.get_range(key, offset, length)
    }
}
