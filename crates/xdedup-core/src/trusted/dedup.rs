//! Two-tier duplicate detection: locality cache first, then the global index.

use std::collections::{HashMap, HashSet};

use tracing::trace;
use xdedup_types::container_id::ContainerId;
use xdedup_types::fingerprint::Fingerprint;
use xdedup_types::recipe::RecipeEntry;

use super::messages::{DedupVerdict, HitSource};
use crate::cache::LocalityCache;
use crate::container::ContainerReader;
use crate::error::{Result, XdedupError};
use crate::index::{IndexCodec, IndexStore};

/// Per-session state kept inside the trusted module.
#[derive(Debug, Default)]
pub struct SessionState {
    /// Fingerprints classified unique in this session and not yet registered.
    pub pending: HashSet<Fingerprint>,
}

/// Borrowed view of the module state a dedup request needs.
pub(crate) struct Deduplicator<'a> {
    pub cache: &'a LocalityCache,
    pub codec: &'a IndexCodec,
    pub index: &'a dyn IndexStore,
    pub reader: &'a dyn ContainerReader,
    pub index_batch_size: usize,
}

impl Deduplicator<'_> {
    /// Answer from the cache or the session's pending set, without touching
    /// the index.
    fn local_verdict(&self, state: &SessionState, fp: &Fingerprint) -> Option<DedupVerdict> {
        if let Some(hit) = self.cache.query(fp) {
            return Some(DedupVerdict::Duplicate {
                entry: hit.location,
                source: HitSource::Cache,
            });
        }
        state
            .pending
            .contains(fp)
            .then_some(DedupVerdict::PendingDuplicate)
    }

    /// Prefetch a container's metadata into the cache so its neighbours hit
    /// locally.
    fn load_container(&self, id: &ContainerId) -> Result<()> {
        if self.cache.contains_container(id) {
            return Ok(());
        }
        let image = self.reader.read_container(id)?;
        self.cache.insert_container(*id, &image.records);
        Ok(())
    }

    fn classify(
        &self,
        state: &mut SessionState,
        fp: &Fingerprint,
        key: &[u8],
        found: Option<Vec<u8>>,
    ) -> Result<DedupVerdict> {
        match found {
            Some(bytes) => {
                let entry: RecipeEntry = self.codec.open(key, &bytes)?;
                self.load_container(&entry.container_id)?;
                Ok(DedupVerdict::Duplicate {
                    entry,
                    source: HitSource::Index,
                })
            }
            None => {
                state.pending.insert(*fp);
                Ok(DedupVerdict::Unique)
            }
        }
    }

    /// One index round-trip per cache miss, in arrival order.
    pub fn naive(
        &self,
        state: &mut SessionState,
        fingerprints: &[Fingerprint],
    ) -> Result<Vec<DedupVerdict>> {
        let mut verdicts = Vec::with_capacity(fingerprints.len());
        for fp in fingerprints {
            if let Some(v) = self.local_verdict(state, fp) {
                verdicts.push(v);
                continue;
            }
            let key = self.codec.fingerprint_key(fp);
            let found = self.index.query_one(&key)?;
            verdicts.push(self.classify(state, fp, &key, found)?);
        }
        Ok(verdicts)
    }

    /// Cache misses are buffered and resolved `index_batch_size` at a time.
    /// Repeats of a buffered fingerprint wait for its answer instead of
    /// being sent twice. Verdicts come back in request order.
    pub fn batching(
        &self,
        state: &mut SessionState,
        fingerprints: &[Fingerprint],
    ) -> Result<Vec<DedupVerdict>> {
        let mut verdicts: Vec<Option<DedupVerdict>> = vec![None; fingerprints.len()];
        let mut outstanding: Vec<(usize, Fingerprint)> = Vec::new();
        let mut leaders: HashMap<Fingerprint, usize> = HashMap::new();
        let mut followers: Vec<(usize, usize)> = Vec::new();

        for (pos, fp) in fingerprints.iter().enumerate() {
            if let Some(&leader) = leaders.get(fp) {
                followers.push((pos, leader));
                continue;
            }
            if let Some(v) = self.local_verdict(state, fp) {
                verdicts[pos] = Some(v);
                continue;
            }
            leaders.insert(*fp, pos);
            outstanding.push((pos, *fp));
            if outstanding.len() >= self.index_batch_size {
                self.flush(state, &mut outstanding, &mut verdicts)?;
            }
        }
        self.flush(state, &mut outstanding, &mut verdicts)?;

        for (pos, leader) in followers {
            verdicts[pos] = match verdicts[leader] {
                Some(DedupVerdict::Duplicate { entry, source }) => {
                    Some(DedupVerdict::Duplicate { entry, source })
                }
                Some(_) => Some(DedupVerdict::PendingDuplicate),
                None => None,
            };
        }

        verdicts
            .into_iter()
            .enumerate()
            .map(|(pos, v)| {
                v.ok_or_else(|| {
                    XdedupError::Other(format!("fingerprint at position {pos} left unresolved"))
                })
            })
            .collect()
    }

    fn flush(
        &self,
        state: &mut SessionState,
        outstanding: &mut Vec<(usize, Fingerprint)>,
        verdicts: &mut [Option<DedupVerdict>],
    ) -> Result<()> {
        if outstanding.is_empty() {
            return Ok(());
        }
        let keys: Vec<Vec<u8>> = outstanding
            .iter()
            .map(|(_, fp)| self.codec.fingerprint_key(fp))
            .collect();
        let results = self.index.query_batch(&keys)?;
        if results.len() != keys.len() {
            return Err(XdedupError::IndexCountMismatch {
                expected: keys.len(),
                actual: results.len(),
            });
        }
        trace!(lookups = keys.len(), "index batch round-trip");
        for (((pos, fp), key), found) in outstanding.drain(..).zip(&keys).zip(results) {
            verdicts[pos] = Some(self.classify(state, &fp, key, found)?);
        }
        Ok(())
    }
}
