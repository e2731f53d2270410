use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::trusted::{HitSource, SessionId};

/// Counters shared by every phase of one session.
#[derive(Debug, Default)]
pub struct SessionStats {
    files: AtomicU64,
    logical_bytes: AtomicU64,
    chunks: AtomicU64,
    cache_hits: AtomicU64,
    index_hits: AtomicU64,
    pending_duplicates: AtomicU64,
    unique_chunks: AtomicU64,
    unique_bytes: AtomicU64,
    delta_chunks: AtomicU64,
    stored_bytes: AtomicU64,
    containers_sealed: AtomicU64,
}

impl SessionStats {
    pub(crate) fn add_file(&self) {
        self.files.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_chunks(&self, count: u64, bytes: u64) {
        self.chunks.fetch_add(count, Ordering::Relaxed);
        self.logical_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_duplicate(&self, source: HitSource) {
        match source {
            HitSource::Cache => self.cache_hits.fetch_add(1, Ordering::Relaxed),
            HitSource::Index => self.index_hits.fetch_add(1, Ordering::Relaxed),
        };
    }

    pub(crate) fn add_pending_duplicate(&self) {
        self.pending_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_unique(&self, bytes: u64) {
        self.unique_chunks.fetch_add(1, Ordering::Relaxed);
        self.unique_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_delta(&self) {
        self.delta_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_stored(&self, bytes: u64) {
        self.stored_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn add_container(&self) {
        self.containers_sealed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            files: get(&self.files),
            logical_bytes: get(&self.logical_bytes),
            chunks: get(&self.chunks),
            cache_hits: get(&self.cache_hits),
            index_hits: get(&self.index_hits),
            pending_duplicates: get(&self.pending_duplicates),
            unique_chunks: get(&self.unique_chunks),
            unique_bytes: get(&self.unique_bytes),
            delta_chunks: get(&self.delta_chunks),
            stored_bytes: get(&self.stored_bytes),
            containers_sealed: get(&self.containers_sealed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub files: u64,
    pub logical_bytes: u64,
    pub chunks: u64,
    pub cache_hits: u64,
    pub index_hits: u64,
    /// Repeats of a chunk first seen earlier in the same session.
    pub pending_duplicates: u64,
    pub unique_chunks: u64,
    pub unique_bytes: u64,
    pub delta_chunks: u64,
    /// Container body bytes written, IVs included.
    pub stored_bytes: u64,
    pub containers_sealed: u64,
}

impl StatsSnapshot {
    pub fn duplicate_chunks(&self) -> u64 {
        self.cache_hits + self.index_hits + self.pending_duplicates
    }

    /// Logical bytes per stored byte. 0 when nothing was stored.
    pub fn dedup_ratio(&self) -> f64 {
        if self.stored_bytes == 0 {
            return 0.0;
        }
        self.logical_bytes as f64 / self.stored_bytes as f64
    }
}

/// Outcome of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: SessionId,
    /// Recipes committed, in commit order.
    pub files: Vec<String>,
    pub stats: StatsSnapshot,
    /// The sink received the stream-end marker and committed.
    pub completed: bool,
    pub cancelled: bool,
    #[serde(skip)]
    pub elapsed: Duration,
}
