//! The trusted side of a site and the boundary that isolates it.
//!
//! Keys, fingerprinting, the locality cache, index blinding and chunk
//! encryption all live behind [`TrustedBoundary`]. The untrusted pipeline
//! holds only an [`EnclaveClient`].

pub mod boundary;
pub mod client;
mod dedup;
pub mod messages;
pub mod module;
pub mod record;

use std::sync::Arc;

use xdedup_crypto::key::SessionKeys;

use crate::config::{BoundaryMode, XdedupConfig};
use crate::container::ContainerReader;
use crate::error::Result;
use crate::index::IndexStore;

pub use boundary::{InProcessBoundary, IsolatedBoundary, TrustedBoundary};
pub use client::EnclaveClient;
pub use dedup::SessionState;
pub use messages::{
    BaseRef, DedupVerdict, EnclaveRequest, EnclaveResponse, EncodeItem, HitSource, ModuleStats,
    SessionId,
};
pub use module::TrustedModule;

/// Start a trusted module behind the boundary `config` selects.
pub fn launch(
    config: &XdedupConfig,
    keys: SessionKeys,
    index: Arc<dyn IndexStore>,
    reader: Arc<dyn ContainerReader>,
) -> Result<EnclaveClient> {
    let module = TrustedModule::new(config, keys, index, reader);
    let boundary: Arc<dyn TrustedBoundary> = match config.security.boundary {
        BoundaryMode::InProcess => Arc::new(InProcessBoundary::new(module)),
        BoundaryMode::Isolated => Arc::new(IsolatedBoundary::spawn(module)?),
    };
    Ok(EnclaveClient::new(boundary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerRepository, ContainerStore};
    use crate::index::KvIndexStore;
    use xdedup_storage::{MemoryBackend, StorageBackend};
    use xdedup_types::error::XdedupError;
    use xdedup_types::fingerprint::Fingerprint;

    struct Harness {
        client: EnclaveClient,
        repo: Arc<ContainerRepository>,
        index: Arc<KvIndexStore>,
        config: XdedupConfig,
    }

    fn harness(boundary: BoundaryMode) -> Harness {
        let mut config = XdedupConfig::default();
        config.security.boundary = boundary;
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let repo = Arc::new(ContainerRepository::new(storage.clone()));
        let index = Arc::new(KvIndexStore::open(storage).unwrap());
        let client = launch(
            &config,
            SessionKeys::derive(&[9; 32]),
            index.clone(),
            repo.clone(),
        )
        .unwrap();
        Harness {
            client,
            repo,
            index,
            config,
        }
    }

    fn data(seed: u64, len: usize) -> Vec<u8> {
        let mut state = seed;
        (0..len)
            .map(|_| {
                state = state
                    .wrapping_mul(6364136223846793005)
                    .wrapping_add(1442695040888963407);
                (state >> 33) as u8
            })
            .collect()
    }

    /// Encode `chunks` as raw records, seal them into one container and register it.
    fn store(h: &Harness, session: SessionId, chunks: &[Vec<u8>]) -> Vec<Fingerprint> {
        let fps = h.client.fingerprint(session, chunks.to_vec()).unwrap();
        let features = h.client.compute_features(session, chunks.to_vec()).unwrap();
        let items = chunks
            .iter()
            .zip(&fps)
            .zip(&features)
            .map(|((c, fp), sf)| EncodeItem {
                fingerprint: *fp,
                features: *sf,
                data: c.clone(),
                base: None,
            })
            .collect();
        let encoded = h.client.encode(session, items).unwrap();
        let mut containers = ContainerStore::new(&h.config.container, h.repo.clone());
        for chunk in &encoded {
            containers.save_chunk(chunk).unwrap();
        }
        let sealed = containers.flush().unwrap().unwrap();
        h.client.register(session, sealed.id, sealed.records).unwrap();
        fps
    }

    #[test]
    fn unique_then_pending_then_duplicate() {
        for mode in [BoundaryMode::InProcess, BoundaryMode::Isolated] {
            let h = harness(mode);
            let s = h.client.open_session().unwrap();
            let fp = h.client.fingerprint(s, vec![data(1, 4096)]).unwrap()[0];

            let verdicts = h
                .client
                .dedup(s, vec![fp, fp], crate::config::DedupStrategy::Batching)
                .unwrap();
            assert_eq!(verdicts, vec![DedupVerdict::Unique, DedupVerdict::PendingDuplicate]);

            store(&h, s, &[data(1, 4096)]);
            let again = h
                .client
                .dedup(s, vec![fp], crate::config::DedupStrategy::Naive)
                .unwrap();
            assert!(matches!(
                again[0],
                DedupVerdict::Duplicate {
                    source: HitSource::Cache,
                    ..
                }
            ));
            h.client.close_session(s).unwrap();
        }
    }

    #[test]
    fn decode_roundtrips_raw_and_delta_chunks() {
        let h = harness(BoundaryMode::InProcess);
        let s = h.client.open_session().unwrap();
        let base = data(7, 8192);
        let fps = store(&h, s, &[base.clone()]);

        let mut similar = base.clone();
        similar[4000..4016].copy_from_slice(&[0xEE; 16]);
        let sim_fp = h.client.fingerprint(s, vec![similar.clone()]).unwrap()[0];
        let sim_sf = h.client.compute_features(s, vec![similar.clone()]).unwrap()[0];
        let bases = h.client.resolve_bases(s, vec![(sim_fp, sim_sf)]).unwrap();
        let base_ref = bases[0].expect("similar chunk should find its base");
        assert_eq!(base_ref.fingerprint, fps[0]);

        let encoded = h
            .client
            .encode(
                s,
                vec![EncodeItem {
                    fingerprint: sim_fp,
                    features: sim_sf,
                    data: similar.clone(),
                    base: Some(base_ref),
                }],
            )
            .unwrap();
        assert_eq!(encoded[0].kind, crate::container::ChunkKind::Delta);
        assert!(encoded[0].ciphertext.len() < 512);

        let mut containers = ContainerStore::new(&h.config.container, h.repo.clone());
        let saved = containers.save_chunk(&encoded[0]).unwrap();
        let sealed = containers.flush().unwrap().unwrap();
        h.client.register(s, sealed.id, sealed.records).unwrap();

        assert_eq!(h.client.decode(s, saved.entry).unwrap(), similar);
        assert_eq!(h.client.decode(s, base_ref.entry).unwrap(), base);
    }

    #[test]
    fn index_hit_after_cache_is_cold() {
        let h = harness(BoundaryMode::InProcess);
        let s = h.client.open_session().unwrap();
        let fps = store(&h, s, &[data(3, 3000)]);
        assert!(h.index.len() > 0);

        // A second module over the same index and containers starts cold.
        let cold = launch(
            &h.config,
            SessionKeys::derive(&[9; 32]),
            h.index.clone(),
            h.repo.clone(),
        )
        .unwrap();
        let s2 = cold.open_session().unwrap();
        let verdicts = cold
            .dedup(s2, fps.clone(), crate::config::DedupStrategy::Naive)
            .unwrap();
        assert!(matches!(
            verdicts[0],
            DedupVerdict::Duplicate {
                source: HitSource::Index,
                ..
            }
        ));
        assert_eq!(cold.stats().unwrap().cache_entries, 1);
    }

    #[test]
    fn encode_rejects_bytes_that_do_not_match_their_fingerprint() {
        let h = harness(BoundaryMode::Isolated);
        let s = h.client.open_session().unwrap();
        let fp = h.client.fingerprint(s, vec![data(4, 2048)]).unwrap()[0];
        let err = h
            .client
            .encode(
                s,
                vec![EncodeItem {
                    fingerprint: fp,
                    features: [0; 3],
                    data: data(5, 2048),
                    base: None,
                }],
            )
            .unwrap_err();
        assert!(matches!(err, XdedupError::FingerprintMismatch(f) if f == fp));
    }

    #[test]
    fn key_id_matches_only_for_the_same_fingerprint_key() {
        let h = harness(BoundaryMode::InProcess);
        let twin = harness(BoundaryMode::Isolated);
        assert_eq!(h.client.key_id().unwrap(), twin.client.key_id().unwrap());

        let other = launch(
            &h.config,
            SessionKeys::derive(&[10; 32]),
            h.index.clone(),
            h.repo.clone(),
        )
        .unwrap();
        assert_ne!(h.client.key_id().unwrap(), other.key_id().unwrap());
    }

    #[test]
    fn unknown_session_is_rejected() {
        let h = harness(BoundaryMode::Isolated);
        let err = h.client.fingerprint(42, vec![vec![1, 2, 3]]).unwrap_err();
        assert!(matches!(err, XdedupError::UnknownSession(42)));
    }

    #[test]
    fn garbage_request_yields_error_response() {
        let h = harness(BoundaryMode::InProcess);
        let module = TrustedModule::new(
            &h.config,
            SessionKeys::derive(&[1; 32]),
            h.index.clone(),
            h.repo.clone(),
        );
        let reply = module.handle_bytes(&[0xC1, 0xFF, 0x00]);
        let response: EnclaveResponse = rmp_serde::from_slice(&reply).unwrap();
        assert!(matches!(response, EnclaveResponse::Error(_)));
    }
}
