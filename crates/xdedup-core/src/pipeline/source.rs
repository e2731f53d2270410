use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};
use xdedup_types::container_id::ContainerId;
use xdedup_types::fingerprint::Fingerprint;
use xdedup_types::recipe::{Recipe, RecipeEntry};

use super::staging::ChunkFetcher;
use crate::chunker::{ChunkSpan, Chunker};
use crate::config::ChunkerConfig;
use crate::container::{ContainerReader, MetaRecord};
use crate::error::{Result, XdedupError};
use crate::recipe::RecipeStore;
use crate::trusted::{EnclaveClient, SessionId};

/// A file about to be streamed by Phase 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: String,
    /// Expected logical size; checked against the chunks produced.
    pub size: u64,
}

/// One chunk produced by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceChunk {
    /// Plaintext still to be fingerprinted.
    Data(Vec<u8>),
    /// Content already stored under a known fingerprint. The bytes are
    /// fetched through [`ChunkSource::fetcher`] only if they must be stored.
    Stored {
        fingerprint: Fingerprint,
        location: RecipeEntry,
        len: u32,
    },
}

impl SourceChunk {
    /// Plaintext length.
    pub fn len(&self) -> u64 {
        match self {
            SourceChunk::Data(data) => data.len() as u64,
            SourceChunk::Stored { len, .. } => *len as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where Phase 1 reads chunks from.
pub trait ChunkSource: Send {
    /// Advance to the next file. `None` once every file has been produced.
    fn next_file(&mut self) -> Result<Option<FileHeader>>;

    /// Next chunk of the current file, or `None` at its end.
    fn next_chunk(&mut self) -> Result<Option<SourceChunk>>;

    /// Resolves [`SourceChunk::Stored`] chunks. Sources that only produce
    /// plaintext have none.
    fn fetcher(&self) -> Option<Arc<dyn ChunkFetcher>> {
        None
    }
}

/// Content to upload under a name.
#[derive(Debug, Clone)]
pub enum FileInput {
    Bytes { name: String, data: Vec<u8> },
    Path { name: String, path: PathBuf },
}

impl FileInput {
    pub fn bytes(name: impl Into<String>, data: Vec<u8>) -> Self {
        FileInput::Bytes {
            name: name.into(),
            data,
        }
    }

    pub fn path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        FileInput::Path {
            name: name.into(),
            path: path.into(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            FileInput::Bytes { name, .. } | FileInput::Path { name, .. } => name,
        }
    }
}

/// Chunks local files or buffers with the content-defined chunker.
pub struct FileSource {
    chunker: Chunker,
    inputs: VecDeque<FileInput>,
    current: Vec<u8>,
    spans: VecDeque<ChunkSpan>,
}

impl FileSource {
    pub fn new(config: &ChunkerConfig, inputs: Vec<FileInput>) -> Result<Self> {
        Ok(Self {
            chunker: Chunker::new(config)?,
            inputs: inputs.into(),
            current: Vec::new(),
            spans: VecDeque::new(),
        })
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }
}

impl ChunkSource for FileSource {
    fn next_file(&mut self) -> Result<Option<FileHeader>> {
        let Some(input) = self.inputs.pop_front() else {
            return Ok(None);
        };
        let (name, data) = match input {
            FileInput::Bytes { name, data } => (name, data),
            FileInput::Path { name, path } => {
                let data = std::fs::read(&path).map_err(|e| {
                    XdedupError::Other(format!("cannot read '{}': {e}", path.display()))
                })?;
                (name, data)
            }
        };
        self.spans = self.chunker.chunk(&data).into();
        self.current = data;
        debug!(file = %name, size = self.current.len(), chunks = self.spans.len(), "chunked file");
        Ok(Some(FileHeader {
            name,
            size: self.current.len() as u64,
        }))
    }

    fn next_chunk(&mut self) -> Result<Option<SourceChunk>> {
        Ok(self
            .spans
            .pop_front()
            .map(|span| SourceChunk::Data(span.slice(&self.current).to_vec())))
    }
}

/// How many source containers' metadata sessions a [`RecipeSource`] keeps.
const RECORD_CACHE_CONTAINERS: usize = 64;

/// Metadata records of recently visited source containers, by body offset.
struct RecordCache {
    reader: Arc<dyn ContainerReader>,
    containers: HashMap<ContainerId, HashMap<u32, MetaRecord>>,
    order: VecDeque<ContainerId>,
}

impl RecordCache {
    fn new(reader: Arc<dyn ContainerReader>) -> Self {
        Self {
            reader,
            containers: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn lookup(&mut self, entry: &RecipeEntry) -> Result<Option<MetaRecord>> {
        let id = entry.container_id;
        if !self.containers.contains_key(&id) {
            let records = self
                .reader
                .read_records(&id)?
                .into_iter()
                .map(|rec| (rec.offset, rec))
                .collect();
            if self.order.len() == RECORD_CACHE_CONTAINERS {
                if let Some(oldest) = self.order.pop_front() {
                    self.containers.remove(&oldest);
                }
            }
            self.order.push_back(id);
            self.containers.insert(id, records);
        }
        Ok(self
            .containers
            .get(&id)
            .and_then(|records| records.get(&entry.offset))
            .filter(|rec| rec.length == entry.length)
            .copied())
    }
}

/// A trusted session on the source site, used to decode the chunks the
/// destination asks for. Closed when the last handle goes away.
struct RemoteChunks {
    client: EnclaveClient,
    session: SessionId,
}

impl ChunkFetcher for RemoteChunks {
    fn fetch(&self, location: &RecipeEntry) -> Result<Vec<u8>> {
        self.client.decode(self.session, *location)
    }
}

impl Drop for RemoteChunks {
    fn drop(&mut self) {
        if let Err(e) = self.client.close_session(self.session) {
            warn!(session = self.session, error = %e, "failed to close source session");
        }
    }
}

/// Reads stored files from another site. Used for cross-site sync.
///
/// Each chunk is emitted under the fingerprint recorded in its source
/// container's metadata, so Phase 2 can classify it before any content is
/// read. Only chunks the destination lacks are then decoded, on demand,
/// through the source's trusted module. Entries without a metadata record
/// are decoded up front and fingerprinted by the destination.
pub struct RecipeSource {
    remote: Arc<RemoteChunks>,
    recipes: RecipeStore,
    records: Option<RecordCache>,
    names: VecDeque<String>,
    current: Option<(Recipe, usize)>,
}

impl RecipeSource {
    pub fn new(
        client: EnclaveClient,
        recipes: RecipeStore,
        reader: Arc<dyn ContainerReader>,
        names: Vec<String>,
    ) -> Result<Self> {
        let session = client.open_session()?;
        Ok(Self {
            remote: Arc::new(RemoteChunks { client, session }),
            recipes,
            records: Some(RecordCache::new(reader)),
            names: names.into(),
            current: None,
        })
    }

    /// Decode every chunk and leave fingerprinting to the destination.
    /// Needed when the two sites fingerprint under different keys.
    pub fn decode_all(mut self) -> Self {
        self.records = None;
        self
    }
}

impl ChunkSource for RecipeSource {
    fn next_file(&mut self) -> Result<Option<FileHeader>> {
        let Some(name) = self.names.pop_front() else {
            self.current = None;
            return Ok(None);
        };
        let recipe = self.recipes.load(&name)?;
        let header = FileHeader {
            name: recipe.name.clone(),
            size: recipe.size,
        };
        self.current = Some((recipe, 0));
        Ok(Some(header))
    }

    fn next_chunk(&mut self) -> Result<Option<SourceChunk>> {
        let Some((recipe, next)) = self.current.as_mut() else {
            return Ok(None);
        };
        let Some(entry) = recipe.entries.get(*next).copied() else {
            return Ok(None);
        };
        *next += 1;

        if let Some(records) = self.records.as_mut() {
            if let Some(rec) = records.lookup(&entry)? {
                return Ok(Some(SourceChunk::Stored {
                    fingerprint: rec.fingerprint,
                    location: entry,
                    len: rec.chunk_len,
                }));
            }
            debug!(
                container = %entry.container_id,
                offset = entry.offset,
                "no metadata record for entry, decoding"
            );
        }
        self.remote.fetch(&entry).map(|data| Some(SourceChunk::Data(data)))
    }

    fn fetcher(&self) -> Option<Arc<dyn ChunkFetcher>> {
        let remote: Arc<dyn ChunkFetcher> = self.remote.clone();
        Some(remote)
    }
}
