use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;
use xdedup_types::fingerprint::Fingerprint;
use xdedup_types::recipe::RecipeEntry;

use crate::error::{Result, XdedupError};

/// Fetches the plaintext of a chunk that is stored at another site.
pub trait ChunkFetcher: Send + Sync {
    fn fetch(&self, location: &RecipeEntry) -> Result<Vec<u8>>;
}

enum Content {
    Loaded(Arc<Vec<u8>>),
    /// Known only by location until a phase asks for the bytes.
    Stored { location: RecipeEntry, len: u32 },
}

struct Staged {
    content: Content,
    refs: usize,
}

/// Chunk bytes in flight between Phase 1 and Phase 5, keyed by fingerprint.
///
/// Every chunk Phase 1 emits takes a reference; the phase that disposes of
/// the chunk (dedup for duplicates, materialization for unique chunks)
/// releases it. Repeated content is held once.
///
/// Chunks staged by location are fetched on first [`get`](Self::get), so
/// content the destination already holds is never read.
#[derive(Default)]
pub struct Staging {
    chunks: Mutex<HashMap<Fingerprint, Staged>>,
    fetcher: Option<Arc<dyn ChunkFetcher>>,
}

impl Staging {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetcher(fetcher: Arc<dyn ChunkFetcher>) -> Self {
        Self {
            chunks: Mutex::new(HashMap::new()),
            fetcher: Some(fetcher),
        }
    }

    pub fn stage(&self, fingerprint: Fingerprint, data: Vec<u8>) {
        self.insert(fingerprint, || Content::Loaded(Arc::new(data)));
    }

    /// Stage a chunk by where the fetcher can find it.
    pub fn stage_stored(&self, fingerprint: Fingerprint, location: RecipeEntry, len: u32) {
        self.insert(fingerprint, || Content::Stored { location, len });
    }

    fn insert(&self, fingerprint: Fingerprint, content: impl FnOnce() -> Content) {
        let mut chunks = self.chunks.lock().unwrap();
        chunks
            .entry(fingerprint)
            .and_modify(|s| s.refs += 1)
            .or_insert_with(|| Staged {
                content: content(),
                refs: 1,
            });
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Result<Arc<Vec<u8>>> {
        let (location, len) = match self.chunks.lock().unwrap().get(fingerprint) {
            None => return Err(XdedupError::ChunkNotStaged(*fingerprint)),
            Some(Staged {
                content: Content::Loaded(data),
                ..
            }) => return Ok(Arc::clone(data)),
            Some(Staged {
                content: Content::Stored { location, len },
                ..
            }) => (*location, *len),
        };

        let fetcher = self
            .fetcher
            .as_ref()
            .ok_or(XdedupError::ChunkNotStaged(*fingerprint))?;
        let data = fetcher.fetch(&location)?;
        if data.len() != len as usize {
            return Err(XdedupError::Malformed(format!(
                "chunk {fingerprint} fetched as {} bytes, expected {len}",
                data.len()
            )));
        }
        trace!(%fingerprint, container = %location.container_id, len, "fetched staged chunk");

        let data = Arc::new(data);
        if let Some(staged) = self.chunks.lock().unwrap().get_mut(fingerprint) {
            staged.content = Content::Loaded(Arc::clone(&data));
        }
        Ok(data)
    }

    pub fn release(&self, fingerprint: &Fingerprint) {
        let mut chunks = self.chunks.lock().unwrap();
        if let Some(staged) = chunks.get_mut(fingerprint) {
            staged.refs -= 1;
            if staged.refs == 0 {
                chunks.remove(fingerprint);
            }
        }
    }

    /// Distinct chunks currently held.
    pub fn len(&self) -> usize {
        self.chunks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
