use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::trace;
use xdedup_types::container_id::ContainerId;
use xdedup_types::fingerprint::Fingerprint;
use xdedup_types::recipe::RecipeEntry;

use crate::container::{ChunkKind, MetaRecord};
use crate::features::SuperFeatures;

/// What the cache knows about one fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheEntry {
    pub location: RecipeEntry,
    pub features: SuperFeatures,
    pub kind: ChunkKind,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    /// Insertion order, oldest first.
    order: VecDeque<Fingerprint>,
    /// `(position, super-feature)` of raw chunks → owning fingerprint.
    by_feature: HashMap<(u8, u64), Fingerprint>,
    /// Resident entries per container.
    containers: HashMap<ContainerId, usize>,
}

impl CacheState {
    fn evict_oldest(&mut self) {
        let Some(fp) = self.order.pop_front() else {
            return;
        };
        let Some(entry) = self.entries.remove(&fp) else {
            return;
        };
        for (i, sf) in entry.features.iter().enumerate() {
            let key = (i as u8, *sf);
            if self.by_feature.get(&key) == Some(&fp) {
                self.by_feature.remove(&key);
            }
        }
        let id = entry.location.container_id;
        if let Some(count) = self.containers.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.containers.remove(&id);
            }
        }
    }
}

/// Bounded fingerprint cache filled a whole container at a time.
///
/// Capacity is an entry count; the oldest inserted entries are evicted
/// first. One mutex serializes inserts and evictions against lookups.
pub struct LocalityCache {
    state: Mutex<CacheState>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LocalityCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn query(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let state = self.state.lock().unwrap();
        let found = state.entries.get(fingerprint).copied();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// First resident raw chunk sharing a super-feature with `features`,
    /// tried in position order.
    pub fn query_similar(&self, features: &SuperFeatures) -> Option<(Fingerprint, CacheEntry)> {
        let state = self.state.lock().unwrap();
        features.iter().enumerate().find_map(|(i, sf)| {
            let fp = state.by_feature.get(&(i as u8, *sf))?;
            state.entries.get(fp).map(|entry| (*fp, *entry))
        })
    }

    /// Bulk-load every record of a container.
    pub fn insert_container(&self, id: ContainerId, records: &[MetaRecord]) {
        let mut state = self.state.lock().unwrap();
        let mut added = 0usize;
        for record in records {
            if state.entries.contains_key(&record.fingerprint) {
                continue;
            }
            let entry = CacheEntry {
                location: record.entry(id),
                features: record.features,
                kind: record.kind,
            };
            state.entries.insert(record.fingerprint, entry);
            state.order.push_back(record.fingerprint);
            *state.containers.entry(id).or_insert(0) += 1;
            if record.kind == ChunkKind::Raw && record.features.iter().any(|sf| *sf != 0) {
                for (i, sf) in record.features.iter().enumerate() {
                    state
                        .by_feature
                        .entry((i as u8, *sf))
                        .or_insert(record.fingerprint);
                }
            }
            added += 1;
        }
        while state.entries.len() > self.capacity {
            state.evict_oldest();
        }
        trace!(
            container = %id,
            added,
            resident = state.entries.len(),
            "cached container records"
        );
    }

    /// Whether any entry of `id` is resident.
    pub fn contains_container(&self, id: &ContainerId) -> bool {
        self.state.lock().unwrap().containers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: u32, kind: ChunkKind) -> MetaRecord {
        let mut fp = [0u8; 32];
        fp[..4].copy_from_slice(&n.to_le_bytes());
        MetaRecord {
            features: [n as u64, 1000 + n as u64, 2000 + n as u64],
            fingerprint: Fingerprint(fp),
            offset: n * 10,
            length: 10,
            chunk_len: 9,
            kind,
        }
    }

    #[test]
    fn query_after_insert_resolves_location() {
        let cache = LocalityCache::new(16);
        let id = ContainerId([1; 16]);
        let records: Vec<_> = (0..4).map(|n| record(n, ChunkKind::Raw)).collect();
        cache.insert_container(id, &records);

        let hit = cache.query(&records[2].fingerprint).unwrap();
        assert_eq!(hit.location.container_id, id);
        assert_eq!(hit.location.offset, 20);
        assert!(cache.contains_container(&id));
        assert!(cache.query(&record(99, ChunkKind::Raw).fingerprint).is_none());
        assert_eq!((cache.hits(), cache.misses()), (1, 1));
    }

    #[test]
    fn evicts_oldest_first_and_never_exceeds_capacity() {
        let cache = LocalityCache::new(5);
        let first = ContainerId([1; 16]);
        let second = ContainerId([2; 16]);
        let old: Vec<_> = (0..4).map(|n| record(n, ChunkKind::Raw)).collect();
        let new: Vec<_> = (10..14).map(|n| record(n, ChunkKind::Raw)).collect();
        cache.insert_container(first, &old);
        cache.insert_container(second, &new);

        assert_eq!(cache.len(), 5);
        assert!(cache.query(&old[0].fingerprint).is_none());
        assert!(cache.query(&old[2].fingerprint).is_none());
        assert!(cache.query(&old[3].fingerprint).is_some());
        assert!(cache.query(&new[3].fingerprint).is_some());
        assert!(cache.contains_container(&first));
    }

    #[test]
    fn similarity_lookup_skips_delta_chunks_and_evicted_entries() {
        let cache = LocalityCache::new(2);
        let id = ContainerId([3; 16]);
        cache.insert_container(id, &[record(1, ChunkKind::Delta), record(2, ChunkKind::Raw)]);

        let raw = record(2, ChunkKind::Raw);
        let (fp, _) = cache.query_similar(&[0, raw.features[1], 0]).unwrap();
        assert_eq!(fp, raw.fingerprint);
        assert!(cache.query_similar(&record(1, ChunkKind::Raw).features).is_none());

        let newer = [record(5, ChunkKind::Raw), record(6, ChunkKind::Raw)];
        cache.insert_container(ContainerId([4; 16]), &newer);
        assert!(cache.query_similar(&raw.features).is_none());
        assert!(!cache.contains_container(&id));
    }
}
