use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, trace, warn};
use xdedup_crypto::aes_gcm::Aes256GcmEngine;
use xdedup_crypto::key::SessionKeys;
use xdedup_crypto::{CryptoEngine, PlaintextEngine};
use xdedup_types::container_id::ContainerId;
use xdedup_types::fingerprint::Fingerprint;
use xdedup_types::recipe::RecipeEntry;

use super::dedup::{Deduplicator, SessionState};
use super::messages::{
    BaseRef, DedupVerdict, EnclaveRequest, EnclaveResponse, EncodeItem, ModuleStats, SessionId,
    WireError,
};
use super::record;
use crate::cache::LocalityCache;
use crate::compress::{self, Compression};
use crate::config::{DedupStrategy, EncryptionMode, XdedupConfig};
use crate::container::{ChunkKind, ContainerReader, EncodedChunk, MetaRecord};
use crate::delta;
use crate::error::{Result, XdedupError};
use crate::features::{FeatureGenerator, SuperFeatures, SUPER_FEATURE_PER_CHUNK};
use crate::index::{FeatureHit, IndexCodec, IndexStore};

const CHUNK_AAD: &[u8] = b"xdedup:chunk\0";
const KEY_ID_LABEL: &[u8] = b"xdedup:fingerprint-key-id\0";

/// The trusted side of a site: holds the keys and every piece of state that
/// must never be visible to the host.
///
/// Reached only through [`handle`](Self::handle) (typed) or
/// [`handle_bytes`](Self::handle_bytes) (serialized). Errors are returned as
/// [`EnclaveResponse::Error`] so they cross the boundary intact.
pub struct TrustedModule {
    keys: SessionKeys,
    crypto: Box<dyn CryptoEngine>,
    codec: IndexCodec,
    features: FeatureGenerator,
    cache: LocalityCache,
    compression: Compression,
    delta_max_ratio: f64,
    index_batch_size: usize,
    index: Arc<dyn IndexStore>,
    reader: Arc<dyn ContainerReader>,
    sessions: Mutex<HashMap<SessionId, Arc<Mutex<SessionState>>>>,
    next_session: AtomicU64,
}

impl TrustedModule {
    pub fn new(
        config: &XdedupConfig,
        keys: SessionKeys,
        index: Arc<dyn IndexStore>,
        reader: Arc<dyn ContainerReader>,
    ) -> Self {
        let crypto: Box<dyn CryptoEngine> = match config.security.encryption {
            EncryptionMode::None => Box::new(PlaintextEngine),
            EncryptionMode::Aes256gcm => Box::new(Aes256GcmEngine::new(&keys.data_key)),
        };
        let codec = IndexCodec::new(&keys.index_key, config.security.encrypt_index);
        Self {
            crypto,
            codec,
            features: FeatureGenerator::new(&config.features),
            cache: LocalityCache::new(config.cache.capacity),
            compression: Compression::from_config(&config.compression),
            delta_max_ratio: config.features.delta_max_ratio,
            index_batch_size: config.pipeline.index_batch_size.max(1),
            index,
            reader,
            sessions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(1),
            keys,
        }
    }

    /// Decode a serialized request, dispatch it and serialize the response.
    pub fn handle_bytes(&self, request: &[u8]) -> Vec<u8> {
        let response = match rmp_serde::from_slice::<EnclaveRequest>(request) {
            Ok(req) => self.handle(req),
            Err(e) => {
                warn!(error = %e, "rejecting malformed trusted request");
                EnclaveResponse::Error(WireError::from(&XdedupError::Malformed(format!(
                    "trusted request: {e}"
                ))))
            }
        };
        rmp_serde::to_vec(&response)
            .or_else(|e| {
                let err = XdedupError::from(e);
                rmp_serde::to_vec(&EnclaveResponse::Error(WireError::from(&err)))
            })
            .unwrap_or_default()
    }

    pub fn handle(&self, request: EnclaveRequest) -> EnclaveResponse {
        match self.dispatch(request) {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, "trusted request failed");
                EnclaveResponse::Error(WireError::from(&e))
            }
        }
    }

    fn dispatch(&self, request: EnclaveRequest) -> Result<EnclaveResponse> {
        match request {
            EnclaveRequest::OpenSession => Ok(EnclaveResponse::SessionOpened(self.open_session())),
            EnclaveRequest::CloseSession { session } => {
                self.close_session(session)?;
                Ok(EnclaveResponse::SessionClosed)
            }
            EnclaveRequest::Fingerprint { session, chunks } => {
                self.session(session)?;
                let fps = chunks
                    .iter()
                    .map(|c| Fingerprint::compute(&self.keys.fingerprint_key, c))
                    .collect();
                Ok(EnclaveResponse::Fingerprints(fps))
            }
            EnclaveRequest::Dedup {
                session,
                fingerprints,
                strategy,
            } => {
                let verdicts = self.dedup(session, &fingerprints, strategy)?;
                Ok(EnclaveResponse::Verdicts(verdicts))
            }
            EnclaveRequest::ComputeFeatures { session, chunks } => {
                self.session(session)?;
                let features = chunks.iter().map(|c| self.features.compute(c)).collect();
                Ok(EnclaveResponse::Features(features))
            }
            EnclaveRequest::ResolveBases { session, items } => {
                self.session(session)?;
                Ok(EnclaveResponse::Bases(self.resolve_bases(&items)?))
            }
            EnclaveRequest::Encode { session, items } => {
                self.session(session)?;
                let encoded = items
                    .into_iter()
                    .map(|item| self.encode(item))
                    .collect::<Result<Vec<_>>>()?;
                Ok(EnclaveResponse::Encoded(encoded))
            }
            EnclaveRequest::Register {
                session,
                container,
                records,
            } => {
                self.register(session, container, &records)?;
                Ok(EnclaveResponse::Registered)
            }
            EnclaveRequest::Decode { session, entry } => {
                self.session(session)?;
                Ok(EnclaveResponse::Decoded(self.decode(&entry)?))
            }
            EnclaveRequest::KeyId => Ok(EnclaveResponse::KeyId(Fingerprint::compute(
                &self.keys.fingerprint_key,
                KEY_ID_LABEL,
            ))),
            EnclaveRequest::Stats => Ok(EnclaveResponse::Stats(self.stats())),
        }
    }

    fn open_session(&self) -> SessionId {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(SessionState::default())));
        info!(session = id, "trusted session opened");
        id
    }

    fn close_session(&self, id: SessionId) -> Result<()> {
        let state = self
            .sessions
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or(XdedupError::UnknownSession(id))?;
        let pending = state.lock().unwrap().pending.len();
        info!(session = id, pending, "trusted session closed");
        Ok(())
    }

    fn session(&self, id: SessionId) -> Result<Arc<Mutex<SessionState>>> {
        self.sessions
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(XdedupError::UnknownSession(id))
    }

    fn dedup(
        &self,
        session: SessionId,
        fingerprints: &[Fingerprint],
        strategy: DedupStrategy,
    ) -> Result<Vec<DedupVerdict>> {
        let state = self.session(session)?;
        let mut state = state.lock().unwrap();
        let dedup = Deduplicator {
            cache: &self.cache,
            codec: &self.codec,
            index: self.index.as_ref(),
            reader: self.reader.as_ref(),
            index_batch_size: self.index_batch_size,
        };
        let verdicts = match strategy {
            DedupStrategy::Naive => dedup.naive(&mut state, fingerprints)?,
            DedupStrategy::Batching => dedup.batching(&mut state, fingerprints)?,
        };
        trace!(
            session,
            %strategy,
            requested = fingerprints.len(),
            unique = verdicts.iter().filter(|v| v.is_unique()).count(),
            "dedup batch classified"
        );
        Ok(verdicts)
    }

    /// Pick a delta base for each chunk: a resident raw chunk first, then
    /// the index's super-feature entries. Positions are tried in order and
    /// the first match wins.
    fn resolve_bases(
        &self,
        items: &[(Fingerprint, SuperFeatures)],
    ) -> Result<Vec<Option<BaseRef>>> {
        let mut bases: Vec<Option<BaseRef>> = vec![None; items.len()];
        let mut misses = Vec::new();
        for (i, (fp, features)) in items.iter().enumerate() {
            if features.iter().all(|sf| *sf == 0) {
                continue;
            }
            match self.cache.query_similar(features) {
                Some((base_fp, hit)) if base_fp != *fp => {
                    bases[i] = Some(FeatureHit {
                        fingerprint: base_fp,
                        entry: hit.location,
                    });
                }
                _ => misses.push(i),
            }
        }
        if misses.is_empty() {
            return Ok(bases);
        }

        let keys: Vec<Vec<u8>> = misses
            .iter()
            .flat_map(|&i| {
                let features = items[i].1;
                (0..SUPER_FEATURE_PER_CHUNK).map(move |pos| self.codec.feature_key(pos, features[pos]))
            })
            .collect();
        let results = self.index.query_batch(&keys)?;
        if results.len() != keys.len() {
            return Err(XdedupError::IndexCountMismatch {
                expected: keys.len(),
                actual: results.len(),
            });
        }
        for (n, &i) in misses.iter().enumerate() {
            let group = n * SUPER_FEATURE_PER_CHUNK..(n + 1) * SUPER_FEATURE_PER_CHUNK;
            for slot in group {
                if let Some(bytes) = &results[slot] {
                    let hit: FeatureHit = self.codec.open(&keys[slot], bytes)?;
                    if hit.fingerprint != items[i].0 {
                        bases[i] = Some(hit);
                        break;
                    }
                }
            }
        }
        Ok(bases)
    }

    /// Compress, optionally delta-encode, and encrypt one chunk. The bytes
    /// must hash to the fingerprint they were classified under.
    fn encode(&self, item: EncodeItem) -> Result<EncodedChunk> {
        if Fingerprint::compute(&self.keys.fingerprint_key, &item.data) != item.fingerprint {
            return Err(XdedupError::FingerprintMismatch(item.fingerprint));
        }
        let mut kind = ChunkKind::Raw;
        let mut plain = None;
        if let Some(base) = &item.base {
            let base_data = self.decode_raw(&base.entry)?;
            let d = delta::encode(&base_data, &item.data);
            if delta::worthwhile(d.len(), item.data.len(), self.delta_max_ratio) {
                let payload = compress::compress(self.compression, &d)?;
                plain = Some(record::encode(Some(&base.entry), &payload)?);
                kind = ChunkKind::Delta;
                trace!(
                    fingerprint = %item.fingerprint,
                    base = %base.fingerprint,
                    delta_len = d.len(),
                    chunk_len = item.data.len(),
                    "delta encoded"
                );
            }
        }
        let plain = match plain {
            Some(p) => p,
            None => record::encode(None, &compress::compress(self.compression, &item.data)?)?,
        };
        let (ciphertext, iv) = self.crypto.encrypt_detached(&plain, CHUNK_AAD)?;
        Ok(EncodedChunk {
            fingerprint: item.fingerprint,
            features: item.features,
            kind,
            chunk_len: item.data.len() as u32,
            ciphertext,
            iv,
        })
    }

    /// Record a sealed container in the index and the cache.
    fn register(&self, session: SessionId, container: ContainerId, records: &[MetaRecord]) -> Result<()> {
        let state = self.session(session)?;
        let mut entries = Vec::with_capacity(records.len() * (1 + SUPER_FEATURE_PER_CHUNK));
        for rec in records {
            let entry = rec.entry(container);
            let key = self.codec.fingerprint_key(&rec.fingerprint);
            let value = self.codec.seal(&key, &entry)?;
            entries.push((key, value));
            if rec.kind == ChunkKind::Raw && rec.features.iter().any(|sf| *sf != 0) {
                let hit = FeatureHit {
                    fingerprint: rec.fingerprint,
                    entry,
                };
                for (pos, sf) in rec.features.iter().enumerate() {
                    let key = self.codec.feature_key(pos, *sf);
                    let value = self.codec.seal(&key, &hit)?;
                    entries.push((key, value));
                }
            }
        }
        self.index.insert_batch(entries)?;
        self.cache.insert_container(container, records);

        let mut state = state.lock().unwrap();
        for rec in records {
            state.pending.remove(&rec.fingerprint);
        }
        debug!(session, container = %container, chunks = records.len(), "registered container");
        Ok(())
    }

    fn read_record(&self, entry: &RecipeEntry) -> Result<Vec<u8>> {
        let stored = self.reader.read_chunk(entry)?;
        self.crypto
            .decrypt_detached(&stored.ciphertext, &stored.iv, CHUNK_AAD)
    }

    fn decode_raw(&self, entry: &RecipeEntry) -> Result<Vec<u8>> {
        let plain = self.read_record(entry)?;
        let rec = record::parse(&plain)?;
        if rec.kind != ChunkKind::Raw {
            return Err(XdedupError::Malformed(format!(
                "delta base at {}+{} is itself a delta",
                entry.container_id, entry.offset
            )));
        }
        compress::decompress(rec.payload)
    }

    /// Recover a chunk's plaintext from its stored location.
    fn decode(&self, entry: &RecipeEntry) -> Result<Vec<u8>> {
        let plain = self.read_record(entry)?;
        let rec = record::parse(&plain)?;
        let payload = compress::decompress(rec.payload)?;
        match rec.base {
            None => Ok(payload),
            Some(base) => {
                let base_data = self.decode_raw(&base)?;
                delta::decode(&base_data, &payload)
            }
        }
    }

    fn stats(&self) -> ModuleStats {
        ModuleStats {
            cache_entries: self.cache.len(),
            cache_capacity: self.cache.capacity(),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
            open_sessions: self.sessions.lock().unwrap().len(),
        }
    }
}
