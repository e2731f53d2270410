use xdedup_types::fingerprint::Fingerprint;

use crate::container::EncodedChunk;
use crate::features::SuperFeatures;
use crate::trusted::BaseRef;

/// Identity of a file whose stream has just ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBoundary {
    /// Position of the file in the session, starting at 0.
    pub file_id: u64,
    pub name: String,
    /// Logical size: the sum of the file's chunk lengths.
    pub size: u64,
}

/// A run of items belonging to one file.
#[derive(Debug)]
pub struct Batch<T> {
    pub file_id: u64,
    pub items: Vec<T>,
    /// Total plaintext bytes the items stand for.
    pub payload_len: u64,
}

impl<T> Batch<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// What travels on every inter-phase queue: ordinary items, or the in-band
/// marker that a file's stream has ended.
#[derive(Debug)]
pub enum Envelope<T> {
    Batch(Batch<T>),
    FileEnd(FileBoundary),
}

/// Phase 1 → 2.
#[derive(Debug, Clone, Copy)]
pub struct ChunkRef {
    pub fingerprint: Fingerprint,
    pub len: u32,
}

/// Phase 3 → 4.
#[derive(Debug, Clone, Copy)]
pub struct FeatureItem {
    pub fingerprint: Fingerprint,
    pub features: SuperFeatures,
}

/// Phase 4 → 5.
#[derive(Debug, Clone, Copy)]
pub struct BaseItem {
    pub fingerprint: Fingerprint,
    pub features: SuperFeatures,
    pub base: Option<BaseRef>,
}

/// Phase 5 → sink.
#[derive(Debug)]
pub enum SinkMessage {
    Chunk(EncodedChunk),
    FileEnd(FileBoundary),
    /// Every file has been sent; the sink may commit.
    StreamEnd,
}
