//! Container format.
//!
//! A sealed container is stored as one object:
//!
//! ```text
//! [meta_len: u32 LE][metadata session: N × record][body: N × (ciphertext ∥ IV)]
//! ```
//!
//! Each metadata record is `features (3 × u64) ∥ fingerprint (32) ∥ body
//! offset (u32) ∥ ciphertext length (u32) ∥ chunk length (u32) ∥ kind (u8)`,
//! in body order.

pub mod layout;
pub mod repository;
pub mod store;

use serde::{Deserialize, Serialize};

use xdedup_crypto::IV_SIZE;
use xdedup_types::container_id::ContainerId;
use xdedup_types::fingerprint::{Fingerprint, FINGERPRINT_SIZE};
use xdedup_types::recipe::RecipeEntry;

use crate::error::{Result, XdedupError};
use crate::features::{SuperFeatures, SUPER_FEATURE_PER_CHUNK};
use layout::{BoundedWriter, ByteReader};

pub use repository::ContainerRepository;
pub use store::{ContainerStore, SaveOutcome, SealedContainer};

/// Size of the metadata-length prefix.
pub const META_LEN_PREFIX: usize = 4;

/// Size of one metadata record.
pub const META_RECORD_SIZE: usize = SUPER_FEATURE_PER_CHUNK * 8 + FINGERPRINT_SIZE + 4 + 4 + 4 + 1;

/// Worst-case body footprint of a chunk of `chunk_len` plaintext bytes:
/// record header, codec expansion, AEAD tag and IV.
pub fn max_stored_chunk_len(chunk_len: usize) -> usize {
    chunk_len + chunk_len / 128 + 256
}

/// How a stored chunk's payload is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkKind {
    Raw,
    Delta,
}

impl ChunkKind {
    pub fn to_byte(self) -> u8 {
        match self {
            ChunkKind::Raw => 0,
            ChunkKind::Delta => 1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(ChunkKind::Raw),
            1 => Ok(ChunkKind::Delta),
            other => Err(XdedupError::Malformed(format!("unknown chunk kind {other}"))),
        }
    }
}

/// A chunk ready to be appended to a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedChunk {
    pub fingerprint: Fingerprint,
    pub features: SuperFeatures,
    pub kind: ChunkKind,
    /// Plaintext length of the chunk this record reconstructs to.
    pub chunk_len: u32,
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
}

impl EncodedChunk {
    /// Bytes this chunk occupies in a container body.
    pub fn body_len(&self) -> usize {
        self.ciphertext.len() + IV_SIZE
    }
}

/// Per-chunk entry of a container's metadata session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaRecord {
    pub features: SuperFeatures,
    pub fingerprint: Fingerprint,
    pub offset: u32,
    pub length: u32,
    pub chunk_len: u32,
    pub kind: ChunkKind,
}

impl MetaRecord {
    pub fn entry(&self, container_id: ContainerId) -> RecipeEntry {
        RecipeEntry {
            container_id,
            offset: self.offset,
            length: self.length,
        }
    }

    pub fn write_to(&self, w: &mut BoundedWriter) -> Result<()> {
        if !w.fits(META_RECORD_SIZE) {
            return Err(XdedupError::CapacityExceeded {
                what: "metadata session",
                needed: META_RECORD_SIZE,
                remaining: w.remaining(),
            });
        }
        for f in self.features {
            w.put_u64(f)?;
        }
        w.put_bytes(self.fingerprint.as_bytes())?;
        w.put_u32(self.offset)?;
        w.put_u32(self.length)?;
        w.put_u32(self.chunk_len)?;
        w.put_u8(self.kind.to_byte())
    }

    pub fn read_from(r: &mut ByteReader<'_>) -> Result<Self> {
        let mut features = [0u64; SUPER_FEATURE_PER_CHUNK];
        for f in features.iter_mut() {
            *f = r.u64()?;
        }
        let fingerprint = Fingerprint(r.array()?);
        let offset = r.u32()?;
        let length = r.u32()?;
        let chunk_len = r.u32()?;
        let kind = ChunkKind::from_byte(r.u8()?)?;
        Ok(Self {
            features,
            fingerprint,
            offset,
            length,
            chunk_len,
            kind,
        })
    }
}

/// Stored bytes of one chunk: ciphertext and the IV that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChunk {
    pub ciphertext: Vec<u8>,
    pub iv: [u8; IV_SIZE],
}

/// A parsed sealed container.
#[derive(Debug, Clone)]
pub struct ContainerImage {
    pub id: ContainerId,
    pub records: Vec<MetaRecord>,
    pub body: Vec<u8>,
}

impl ContainerImage {
    /// Parse a container object and check every record against the body.
    pub fn parse(id: ContainerId, bytes: &[u8]) -> Result<Self> {
        let corrupt = |reason: String| XdedupError::ContainerCorrupt {
            container: id,
            reason,
        };
        let mut r = ByteReader::new(bytes, "container");
        let meta_len = r
            .u32()
            .map_err(|_| corrupt("missing metadata length".into()))? as usize;
        if meta_len > r.remaining() || meta_len % META_RECORD_SIZE != 0 {
            return Err(corrupt(format!(
                "metadata length {meta_len} invalid for {}-byte object",
                bytes.len()
            )));
        }
        let mut meta = ByteReader::new(r.bytes(meta_len)?, "metadata session");
        let mut records = Vec::with_capacity(meta_len / META_RECORD_SIZE);
        while meta.remaining() > 0 {
            records.push(MetaRecord::read_from(&mut meta)?);
        }
        let body = r.rest().to_vec();
        for rec in &records {
            let end = rec.offset as usize + rec.length as usize + IV_SIZE;
            if end > body.len() {
                return Err(corrupt(format!(
                    "record for {} ends at {end}, body is {} bytes",
                    rec.fingerprint,
                    body.len()
                )));
            }
        }
        Ok(Self { id, records, body })
    }

    /// Stored bytes at `(offset, length)` of this container's body.
    pub fn chunk(&self, offset: u32, length: u32) -> Result<StoredChunk> {
        let start = offset as usize;
        let end = start + length as usize;
        if end + IV_SIZE > self.body.len() {
            return Err(XdedupError::ContainerCorrupt {
                container: self.id,
                reason: format!("entry {start}+{length} outside {}-byte body", self.body.len()),
            });
        }
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&self.body[end..end + IV_SIZE]);
        Ok(StoredChunk {
            ciphertext: self.body[start..end].to_vec(),
            iv,
        })
    }
}

/// Untrusted-side handoff of sealed containers.
pub trait ContainerPersistence: Send + Sync {
    /// Store one sealed container atomically.
    fn write_container(&self, id: &ContainerId, bytes: &[u8]) -> Result<()>;
}

/// Untrusted-side container reads requested by the trusted module.
pub trait ContainerReader: Send + Sync {
    /// Fetch and parse a whole container.
    fn read_container(&self, id: &ContainerId) -> Result<ContainerImage>;

    /// Fetch only the metadata session of a container.
    fn read_records(&self, id: &ContainerId) -> Result<Vec<MetaRecord>>;

    /// Fetch one chunk's stored bytes.
    fn read_chunk(&self, entry: &RecipeEntry) -> Result<StoredChunk>;
}
