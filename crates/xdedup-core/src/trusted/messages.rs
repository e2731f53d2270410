use serde::{Deserialize, Serialize};

use xdedup_types::container_id::ContainerId;
use xdedup_types::error::{ErrorKind, XdedupError};
use xdedup_types::fingerprint::Fingerprint;
use xdedup_types::recipe::RecipeEntry;

use crate::config::DedupStrategy;
use crate::container::{EncodedChunk, MetaRecord};
use crate::features::SuperFeatures;
use crate::index::FeatureHit;

pub type SessionId = u64;

/// A stored raw chunk selected as the delta base of a new chunk.
pub type BaseRef = FeatureHit;

/// Where a duplicate was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HitSource {
    Cache,
    Index,
}

/// Phase-2 classification of one fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DedupVerdict {
    /// Already stored and sealed at `entry`.
    Duplicate { entry: RecipeEntry, source: HitSource },
    /// Unique earlier in this session; its location is known once written.
    PendingDuplicate,
    /// Globally unique: must be stored.
    Unique,
}

impl DedupVerdict {
    pub fn is_unique(&self) -> bool {
        matches!(self, DedupVerdict::Unique)
    }
}

/// One chunk to be materialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodeItem {
    pub fingerprint: Fingerprint,
    pub features: SuperFeatures,
    pub data: Vec<u8>,
    pub base: Option<BaseRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EnclaveRequest {
    OpenSession,
    CloseSession {
        session: SessionId,
    },
    Fingerprint {
        session: SessionId,
        chunks: Vec<Vec<u8>>,
    },
    Dedup {
        session: SessionId,
        fingerprints: Vec<Fingerprint>,
        strategy: DedupStrategy,
    },
    ComputeFeatures {
        session: SessionId,
        chunks: Vec<Vec<u8>>,
    },
    ResolveBases {
        session: SessionId,
        items: Vec<(Fingerprint, SuperFeatures)>,
    },
    Encode {
        session: SessionId,
        items: Vec<EncodeItem>,
    },
    Register {
        session: SessionId,
        container: ContainerId,
        records: Vec<MetaRecord>,
    },
    Decode {
        session: SessionId,
        entry: RecipeEntry,
    },
    /// Identifies the fingerprint key without revealing it. Two modules
    /// return the same id exactly when their fingerprints agree.
    KeyId,
    Stats,
}

/// Counters exposed by the trusted module. Never includes content or keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStats {
    pub cache_entries: usize,
    pub cache_capacity: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub open_sessions: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EnclaveResponse {
    SessionOpened(SessionId),
    SessionClosed,
    Fingerprints(Vec<Fingerprint>),
    Verdicts(Vec<DedupVerdict>),
    Features(Vec<SuperFeatures>),
    Bases(Vec<Option<BaseRef>>),
    Encoded(Vec<EncodedChunk>),
    Registered,
    Decoded(Vec<u8>),
    KeyId(Fingerprint),
    Stats(ModuleStats),
    Error(WireError),
}

impl EnclaveResponse {
    pub fn name(&self) -> &'static str {
        match self {
            EnclaveResponse::SessionOpened(_) => "SessionOpened",
            EnclaveResponse::SessionClosed => "SessionClosed",
            EnclaveResponse::Fingerprints(_) => "Fingerprints",
            EnclaveResponse::Verdicts(_) => "Verdicts",
            EnclaveResponse::Features(_) => "Features",
            EnclaveResponse::Bases(_) => "Bases",
            EnclaveResponse::Encoded(_) => "Encoded",
            EnclaveResponse::Registered => "Registered",
            EnclaveResponse::Decoded(_) => "Decoded",
            EnclaveResponse::KeyId(_) => "KeyId",
            EnclaveResponse::Stats(_) => "Stats",
            EnclaveResponse::Error(_) => "Error",
        }
    }
}

/// An error raised inside the trusted module, in a form that can cross the
/// boundary without losing its classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireError {
    IndexCountMismatch { expected: usize, actual: usize },
    ContainerNotFound(ContainerId),
    ContainerCorrupt { container: ContainerId, reason: String },
    UnknownSession(SessionId),
    DecryptionFailed,
    FingerprintMismatch(Fingerprint),
    Other { kind: ErrorKind, message: String },
}

impl From<&XdedupError> for WireError {
    fn from(e: &XdedupError) -> Self {
        match e {
            XdedupError::IndexCountMismatch { expected, actual } => WireError::IndexCountMismatch {
                expected: *expected,
                actual: *actual,
            },
            XdedupError::ContainerNotFound(id) => WireError::ContainerNotFound(*id),
            XdedupError::ContainerCorrupt { container, reason } => WireError::ContainerCorrupt {
                container: *container,
                reason: reason.clone(),
            },
            XdedupError::UnknownSession(id) => WireError::UnknownSession(*id),
            XdedupError::DecryptionFailed => WireError::DecryptionFailed,
            XdedupError::FingerprintMismatch(fp) => WireError::FingerprintMismatch(*fp),
            other => WireError::Other {
                kind: other.kind(),
                message: other.to_string(),
            },
        }
    }
}

impl From<WireError> for XdedupError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::IndexCountMismatch { expected, actual } => {
                XdedupError::IndexCountMismatch { expected, actual }
            }
            WireError::ContainerNotFound(id) => XdedupError::ContainerNotFound(id),
            WireError::ContainerCorrupt { container, reason } => {
                XdedupError::ContainerCorrupt { container, reason }
            }
            WireError::UnknownSession(id) => XdedupError::UnknownSession(id),
            WireError::DecryptionFailed => XdedupError::DecryptionFailed,
            WireError::FingerprintMismatch(fp) => XdedupError::FingerprintMismatch(fp),
            WireError::Other { kind, message } => XdedupError::Trusted { kind, message },
        }
    }
}
