use std::sync::Arc;

use tracing::debug;
use xdedup_types::container_id::ContainerId;
use xdedup_types::recipe::RecipeEntry;

use super::layout::BoundedWriter;
use super::{ContainerPersistence, EncodedChunk, MetaRecord, META_LEN_PREFIX};
use crate::config::ContainerConfig;
use crate::error::{Result, XdedupError};

/// A container that has been sealed and handed to persistence.
#[derive(Debug, Clone)]
pub struct SealedContainer {
    pub id: ContainerId,
    pub records: Vec<MetaRecord>,
    pub body_len: usize,
}

/// Result of appending one chunk.
#[derive(Debug)]
pub struct SaveOutcome {
    /// Where the chunk now lives.
    pub entry: RecipeEntry,
    /// The previous container, if this chunk forced it to be sealed first.
    pub sealed: Option<SealedContainer>,
}

/// The container currently being filled.
struct OpenContainer {
    id: ContainerId,
    body: BoundedWriter,
    meta: BoundedWriter,
    records: Vec<MetaRecord>,
}

impl OpenContainer {
    fn new(body_limit: usize, meta_limit: usize) -> Self {
        Self {
            id: ContainerId::generate(),
            body: BoundedWriter::new(body_limit, "container body"),
            meta: BoundedWriter::new(meta_limit, "metadata session"),
            records: Vec::new(),
        }
    }
}

/// Write-back buffer that packs chunks into bounded containers.
///
/// Owned by one writer context. A container is sealed when the next chunk
/// (or its metadata record) would not fit; the chunk is then written first
/// into a fresh container with a newly issued id.
pub struct ContainerStore {
    max_container_size: usize,
    max_meta_size: usize,
    metadata_session: bool,
    persistence: Arc<dyn ContainerPersistence>,
    open: Option<OpenContainer>,
    written_data_size: u64,
    written_chunk_num: u64,
    containers_sealed: u64,
}

impl ContainerStore {
    pub fn new(config: &ContainerConfig, persistence: Arc<dyn ContainerPersistence>) -> Self {
        Self {
            max_container_size: config.max_container_size as usize,
            max_meta_size: if config.metadata_session {
                config.max_meta_size as usize
            } else {
                0
            },
            metadata_session: config.metadata_session,
            persistence,
            open: None,
            written_data_size: 0,
            written_chunk_num: 0,
            containers_sealed: 0,
        }
    }

    fn fits(&self, open: &OpenContainer, body_len: usize) -> bool {
        open.body.fits(body_len)
            && (!self.metadata_session || open.meta.fits(super::META_RECORD_SIZE))
    }

    /// Append one encoded chunk and return where it lives.
    pub fn save_chunk(&mut self, chunk: &EncodedChunk) -> Result<SaveOutcome> {
        let needed = chunk.body_len();
        if needed > self.max_container_size {
            return Err(XdedupError::CapacityExceeded {
                what: "container body",
                needed,
                remaining: self.max_container_size,
            });
        }

        let mut sealed = None;
        if let Some(open) = &self.open {
            if !self.fits(open, needed) {
                sealed = self.seal()?;
            }
        }

        let (body_limit, meta_limit) = (self.max_container_size, self.max_meta_size);
        let open = self.open.get_or_insert_with(|| {
            let fresh = OpenContainer::new(body_limit, meta_limit);
            debug!(container = %fresh.id, "opened container");
            fresh
        });

        let offset = open.body.len() as u32;
        open.body.put_bytes(&chunk.ciphertext)?;
        open.body.put_bytes(&chunk.iv)?;
        let record = MetaRecord {
            features: chunk.features,
            fingerprint: chunk.fingerprint,
            offset,
            length: chunk.ciphertext.len() as u32,
            chunk_len: chunk.chunk_len,
            kind: chunk.kind,
        };
        if self.metadata_session {
            record.write_to(&mut open.meta)?;
        }
        open.records.push(record);

        self.written_data_size += needed as u64;
        self.written_chunk_num += 1;

        Ok(SaveOutcome {
            entry: record.entry(open.id),
            sealed,
        })
    }

    /// Seal the open container, if it holds anything, and hand it to
    /// persistence as a single object.
    pub fn seal(&mut self) -> Result<Option<SealedContainer>> {
        let open = match self.open.take() {
            Some(open) if !open.records.is_empty() => open,
            _ => return Ok(None),
        };

        let total = META_LEN_PREFIX + open.meta.len() + open.body.len();
        let mut out = BoundedWriter::new(total, "sealed container");
        out.put_u32(open.meta.len() as u32)?;
        out.put_bytes(open.meta.as_slice())?;
        out.put_bytes(open.body.as_slice())?;
        self.persistence.write_container(&open.id, out.as_slice())?;
        self.containers_sealed += 1;

        debug!(
            container = %open.id,
            chunks = open.records.len(),
            body_bytes = open.body.len(),
            "sealed container"
        );
        Ok(Some(SealedContainer {
            id: open.id,
            records: open.records,
            body_len: open.body.len(),
        }))
    }

    /// Seal whatever is buffered. Called at stream end.
    pub fn flush(&mut self) -> Result<Option<SealedContainer>> {
        self.seal()
    }

    /// Drop the open container without persisting it.
    pub fn discard(&mut self) -> Option<ContainerId> {
        self.open.take().map(|open| open.id)
    }

    pub fn open_container_id(&self) -> Option<ContainerId> {
        self.open.as_ref().map(|open| open.id)
    }

    /// Body bytes appended so far, including IVs.
    pub fn written_data_size(&self) -> u64 {
        self.written_data_size
    }

    pub fn written_chunk_num(&self) -> u64 {
        self.written_chunk_num
    }

    pub fn containers_sealed(&self) -> u64 {
        self.containers_sealed
    }

    /// Room left in the open container's body.
    pub fn open_remaining(&self) -> usize {
        self.open
            .as_ref()
            .map_or(self.max_container_size, |open| open.body.remaining())
    }
}
