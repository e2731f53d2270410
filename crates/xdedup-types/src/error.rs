use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::container_id::ContainerId;
use crate::fingerprint::Fingerprint;

pub type Result<T> = std::result::Result<T, XdedupError>;

/// How a failure should be handled by the session that observes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Deployment or configuration bug. Abort, never retry.
    Fatal,
    /// The session's peer or persistent state violated the protocol. Abort the session.
    Protocol,
    /// The peer went away cleanly. End the session without reporting an error.
    Transient,
}

#[derive(Debug, Error)]
pub enum XdedupError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid chunker parameters: {0}")]
    InvalidChunkerParams(String),

    #[error("{what} capacity exceeded: needed {needed} bytes, {remaining} remaining")]
    CapacityExceeded {
        what: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("container not found: {0}")]
    ContainerNotFound(ContainerId),

    #[error("container {container} is corrupt: {reason}")]
    ContainerCorrupt {
        container: ContainerId,
        reason: String,
    },

    #[error("index round-trip returned {actual} results for {expected} requests")]
    IndexCountMismatch { expected: usize, actual: usize },

    #[error("chunk {0} missing from staging")]
    ChunkNotStaged(Fingerprint),

    #[error("chunk content does not match fingerprint {0}")]
    FingerprintMismatch(Fingerprint),

    #[error("recipe not found: '{0}'")]
    RecipeNotFound(String),

    #[error("unknown trusted session {0}")]
    UnknownSession(u64),

    #[error("decryption failed: wrong key or corrupted data")]
    DecryptionFailed,

    #[error("key derivation error: {0}")]
    KeyDerivation(String),

    #[error("unknown compression tag: {0}")]
    UnknownCompressionTag(u8),

    #[error("decompression error: {0}")]
    Decompression(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("invalid storage layout: {0}")]
    InvalidFormat(String),

    #[error("trusted module: {message}")]
    Trusted { kind: ErrorKind, message: String },

    #[error("peer closed the connection")]
    PeerClosed,

    #[error("phase '{phase}' failed: {source}")]
    PhaseFailed {
        phase: &'static str,
        #[source]
        source: Box<XdedupError>,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl XdedupError {
    /// Wrap an error with the name of the pipeline phase that raised it.
    pub fn in_phase(self, phase: &'static str) -> Self {
        match self {
            already @ XdedupError::PhaseFailed { .. } => already,
            other => XdedupError::PhaseFailed {
                phase,
                source: Box::new(other),
            },
        }
    }

    /// Classify the error for session-level handling.
    pub fn kind(&self) -> ErrorKind {
        match self {
            XdedupError::Config(_)
            | XdedupError::InvalidChunkerParams(_)
            | XdedupError::CapacityExceeded { .. }
            | XdedupError::ContainerNotFound(_)
            | XdedupError::KeyDerivation(_) => ErrorKind::Fatal,
            XdedupError::PeerClosed => ErrorKind::Transient,
            XdedupError::PhaseFailed { source, .. } => source.kind(),
            XdedupError::Trusted { kind, .. } => *kind,
            XdedupError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                ErrorKind::Transient
            }
            _ => ErrorKind::Protocol,
        }
    }
}
