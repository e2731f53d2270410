use std::sync::Arc;

use xdedup_types::container_id::ContainerId;
use xdedup_types::fingerprint::Fingerprint;
use xdedup_types::recipe::RecipeEntry;

use super::boundary::TrustedBoundary;
use super::messages::{
    BaseRef, DedupVerdict, EnclaveRequest, EnclaveResponse, EncodeItem, ModuleStats, SessionId,
};
use crate::config::DedupStrategy;
use crate::container::{EncodedChunk, MetaRecord};
use crate::error::{Result, XdedupError};
use crate::features::SuperFeatures;

/// Typed, untrusted-side handle on a trusted module.
#[derive(Clone)]
pub struct EnclaveClient {
    boundary: Arc<dyn TrustedBoundary>,
}

fn unexpected(expected: &str, got: &EnclaveResponse) -> XdedupError {
    XdedupError::Malformed(format!("expected {expected} response, got {}", got.name()))
}

fn check_count(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(XdedupError::Malformed(format!(
            "{what}: {actual} results for {expected} items"
        )));
    }
    Ok(())
}

impl EnclaveClient {
    pub fn new(boundary: Arc<dyn TrustedBoundary>) -> Self {
        Self { boundary }
    }

    fn roundtrip(&self, request: &EnclaveRequest) -> Result<EnclaveResponse> {
        let bytes = rmp_serde::to_vec(request)?;
        let reply = self.boundary.call(bytes)?;
        let response: EnclaveResponse = rmp_serde::from_slice(&reply)
            .map_err(|e| XdedupError::Malformed(format!("trusted response: {e}")))?;
        match response {
            EnclaveResponse::Error(e) => Err(e.into()),
            other => Ok(other),
        }
    }

    pub fn open_session(&self) -> Result<SessionId> {
        match self.roundtrip(&EnclaveRequest::OpenSession)? {
            EnclaveResponse::SessionOpened(id) => Ok(id),
            other => Err(unexpected("SessionOpened", &other)),
        }
    }

    pub fn close_session(&self, session: SessionId) -> Result<()> {
        match self.roundtrip(&EnclaveRequest::CloseSession { session })? {
            EnclaveResponse::SessionClosed => Ok(()),
            other => Err(unexpected("SessionClosed", &other)),
        }
    }

    pub fn fingerprint(&self, session: SessionId, chunks: Vec<Vec<u8>>) -> Result<Vec<Fingerprint>> {
        let n = chunks.len();
        match self.roundtrip(&EnclaveRequest::Fingerprint { session, chunks })? {
            EnclaveResponse::Fingerprints(fps) => {
                check_count("fingerprint", n, fps.len())?;
                Ok(fps)
            }
            other => Err(unexpected("Fingerprints", &other)),
        }
    }

    pub fn dedup(
        &self,
        session: SessionId,
        fingerprints: Vec<Fingerprint>,
        strategy: DedupStrategy,
    ) -> Result<Vec<DedupVerdict>> {
        let n = fingerprints.len();
        let request = EnclaveRequest::Dedup {
            session,
            fingerprints,
            strategy,
        };
        match self.roundtrip(&request)? {
            EnclaveResponse::Verdicts(verdicts) => {
                check_count("dedup", n, verdicts.len())?;
                Ok(verdicts)
            }
            other => Err(unexpected("Verdicts", &other)),
        }
    }

    pub fn compute_features(
        &self,
        session: SessionId,
        chunks: Vec<Vec<u8>>,
    ) -> Result<Vec<SuperFeatures>> {
        let n = chunks.len();
        match self.roundtrip(&EnclaveRequest::ComputeFeatures { session, chunks })? {
            EnclaveResponse::Features(features) => {
                check_count("features", n, features.len())?;
                Ok(features)
            }
            other => Err(unexpected("Features", &other)),
        }
    }

    pub fn resolve_bases(
        &self,
        session: SessionId,
        items: Vec<(Fingerprint, SuperFeatures)>,
    ) -> Result<Vec<Option<BaseRef>>> {
        let n = items.len();
        match self.roundtrip(&EnclaveRequest::ResolveBases { session, items })? {
            EnclaveResponse::Bases(bases) => {
                check_count("resolve", n, bases.len())?;
                Ok(bases)
            }
            other => Err(unexpected("Bases", &other)),
        }
    }

    pub fn encode(&self, session: SessionId, items: Vec<EncodeItem>) -> Result<Vec<EncodedChunk>> {
        let n = items.len();
        match self.roundtrip(&EnclaveRequest::Encode { session, items })? {
            EnclaveResponse::Encoded(chunks) => {
                check_count("encode", n, chunks.len())?;
                Ok(chunks)
            }
            other => Err(unexpected("Encoded", &other)),
        }
    }

    pub fn register(
        &self,
        session: SessionId,
        container: ContainerId,
        records: Vec<MetaRecord>,
    ) -> Result<()> {
        let request = EnclaveRequest::Register {
            session,
            container,
            records,
        };
        match self.roundtrip(&request)? {
            EnclaveResponse::Registered => Ok(()),
            other => Err(unexpected("Registered", &other)),
        }
    }

    pub fn decode(&self, session: SessionId, entry: RecipeEntry) -> Result<Vec<u8>> {
        match self.roundtrip(&EnclaveRequest::Decode { session, entry })? {
            EnclaveResponse::Decoded(data) => Ok(data),
            other => Err(unexpected("Decoded", &other)),
        }
    }

    pub fn key_id(&self) -> Result<Fingerprint> {
        match self.roundtrip(&EnclaveRequest::KeyId)? {
            EnclaveResponse::KeyId(id) => Ok(id),
            other => Err(unexpected("KeyId", &other)),
        }
    }

    pub fn stats(&self) -> Result<ModuleStats> {
        match self.roundtrip(&EnclaveRequest::Stats)? {
            EnclaveResponse::Stats(stats) => Ok(stats),
            other => Err(unexpected("Stats", &other)),
        }
    }
}
