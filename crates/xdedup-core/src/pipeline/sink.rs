use std::collections::HashMap;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};
use xdedup_types::fingerprint::Fingerprint;
use xdedup_types::recipe::{Recipe, RecipeEntry};

use super::messages::{FileBoundary, SinkMessage};
use super::recipe_book::{RecipeBook, Slot};
use super::stats::SessionStats;
use crate::config::ContainerConfig;
use crate::container::{ContainerPersistence, ContainerStore, EncodedChunk, SealedContainer};
use crate::error::{Result, XdedupError};
use crate::index::IndexStore;
use crate::recipe::RecipeStore;
use crate::trusted::{EnclaveClient, SessionId};

/// Consumer of Phase 5 output.
pub trait ChunkSink: Send {
    /// Deliver one message. [`XdedupError::PeerClosed`] means the sink is gone.
    fn send(&mut self, msg: SinkMessage) -> Result<()>;
}

/// Forwards Phase 5 output to a writer running elsewhere.
pub struct ChannelSink {
    tx: Sender<SinkMessage>,
}

impl ChannelSink {
    pub fn new(tx: Sender<SinkMessage>) -> Self {
        Self { tx }
    }
}

impl ChunkSink for ChannelSink {
    fn send(&mut self, msg: SinkMessage) -> Result<()> {
        self.tx.send(msg).map_err(|_| XdedupError::PeerClosed)
    }
}

/// What a writer committed.
#[derive(Debug, Clone, Default)]
pub struct WriterSummary {
    /// Names of the recipes persisted, in commit order.
    pub committed: Vec<String>,
    /// The stream-end marker arrived and everything was flushed.
    pub completed: bool,
}

/// Destination side of a session: packs chunks into containers, registers
/// sealed containers with the trusted module, and commits recipes.
///
/// A recipe is persisted only once every container it references is
/// sealed. Recipes finished while their last chunks still sit in the open
/// container are held until that container seals.
pub struct DestinationWriter<'a> {
    client: EnclaveClient,
    session: SessionId,
    containers: ContainerStore,
    index: Arc<dyn IndexStore>,
    recipes: RecipeStore,
    book: &'a RecipeBook,
    stats: &'a SessionStats,
    written: HashMap<Fingerprint, RecipeEntry>,
    held: Vec<Recipe>,
    summary: WriterSummary,
}

impl<'a> DestinationWriter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &ContainerConfig,
        client: EnclaveClient,
        session: SessionId,
        persistence: Arc<dyn ContainerPersistence>,
        index: Arc<dyn IndexStore>,
        recipes: RecipeStore,
        book: &'a RecipeBook,
        stats: &'a SessionStats,
    ) -> Self {
        Self {
            client,
            session,
            containers: ContainerStore::new(config, persistence),
            index,
            recipes,
            book,
            stats,
            written: HashMap::new(),
            held: Vec::new(),
            summary: WriterSummary::default(),
        }
    }

    /// Consume messages until the stream ends or the channel closes.
    pub fn drain(mut self, rx: Receiver<SinkMessage>) -> Result<WriterSummary> {
        for msg in &rx {
            self.send(msg)?;
            if self.summary.completed {
                break;
            }
        }
        if !self.summary.completed {
            self.abandon();
        }
        Ok(self.summary)
    }

    pub fn summary(&self) -> &WriterSummary {
        &self.summary
    }

    fn save(&mut self, chunk: EncodedChunk) -> Result<()> {
        let outcome = self.containers.save_chunk(&chunk)?;
        if let Some(sealed) = outcome.sealed {
            self.on_sealed(sealed)?;
        }
        self.stats.add_stored(chunk.body_len() as u64);
        self.written.insert(chunk.fingerprint, outcome.entry);
        Ok(())
    }

    fn on_sealed(&mut self, sealed: SealedContainer) -> Result<()> {
        self.stats.add_container();
        self.client.register(self.session, sealed.id, sealed.records)?;
        // Only one container is open at a time, so every held recipe
        // referenced the one just sealed.
        for recipe in std::mem::take(&mut self.held) {
            self.commit(recipe)?;
        }
        Ok(())
    }

    fn commit(&mut self, recipe: Recipe) -> Result<()> {
        self.recipes.save(&recipe)?;
        self.summary.committed.push(recipe.name);
        Ok(())
    }

    fn finish_file(&mut self, boundary: FileBoundary) -> Result<()> {
        let slots = self.book.take_file(boundary.file_id);
        let mut recipe = Recipe::new(boundary.name, boundary.size);
        recipe.entries.reserve(slots.len());
        for slot in slots {
            let entry = match slot {
                Slot::Resolved(entry) => entry,
                Slot::Pending(fp) => *self.written.get(&fp).ok_or_else(|| {
                    XdedupError::Malformed(format!(
                        "file '{}' references chunk {fp} that was never stored",
                        recipe.name
                    ))
                })?,
            };
            recipe.entries.push(entry);
        }

        let open = self.containers.open_container_id();
        let waits = open.is_some_and(|id| recipe.entries.iter().any(|e| e.container_id == id));
        if waits {
            debug!(file = %recipe.name, "recipe held until its container seals");
            self.held.push(recipe);
            Ok(())
        } else {
            self.commit(recipe)
        }
    }

    fn finish_stream(&mut self) -> Result<()> {
        if let Some(sealed) = self.containers.flush()? {
            self.on_sealed(sealed)?;
        }
        for recipe in std::mem::take(&mut self.held) {
            self.commit(recipe)?;
        }
        self.index.persist()?;
        self.summary.completed = true;
        info!(
            session = self.session,
            recipes = self.summary.committed.len(),
            containers = self.containers.containers_sealed(),
            stored_bytes = self.containers.written_data_size(),
            "stream committed"
        );
        Ok(())
    }

    /// Drop everything that was not sealed. Recipes referencing the open
    /// container are never persisted.
    fn abandon(&mut self) {
        if let Some(id) = self.containers.discard() {
            warn!(session = self.session, container = %id, "discarding unsealed container");
        }
        if !self.held.is_empty() {
            warn!(
                session = self.session,
                recipes = self.held.len(),
                "dropping recipes that reference the discarded container"
            );
            self.held.clear();
        }
    }
}

impl ChunkSink for DestinationWriter<'_> {
    fn send(&mut self, msg: SinkMessage) -> Result<()> {
        if self.summary.completed {
            return Err(XdedupError::Malformed("message after stream end".into()));
        }
        match msg {
            SinkMessage::Chunk(chunk) => self.save(chunk),
            SinkMessage::FileEnd(boundary) => self.finish_file(boundary),
            SinkMessage::StreamEnd => self.finish_stream(),
        }
    }
}
