//! The five-phase streaming pipeline.
//!
//! ```text
//! source ─► read ─► dedup ─► features ─► resolve ─► materialize ─► sink
//!           (1)      (2)       (3)         (4)          (5)
//! ```
//!
//! Each phase runs on its own thread and talks to its neighbours through
//! bounded queues. A phase is done when its upstream sender is dropped and
//! the queue is empty. File boundaries travel in-band as
//! [`Envelope::FileEnd`].

pub mod dedup;
pub mod features;
pub mod materialize;
pub mod messages;
pub mod read;
pub mod recipe_book;
pub mod resolve;
pub mod session;
pub mod sink;
pub mod source;
pub mod staging;
pub mod state;
pub mod stats;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, warn};

use crate::config::XdedupConfig;
use crate::error::XdedupError;
use crate::trusted::{EnclaveClient, SessionId};

pub use messages::{BaseItem, Batch, ChunkRef, Envelope, FeatureItem, FileBoundary, SinkMessage};
pub use recipe_book::{RecipeBook, Slot};
pub use session::SyncSession;
pub use sink::{ChannelSink, ChunkSink, DestinationWriter, WriterSummary};
pub use source::{ChunkSource, FileHeader, FileInput, FileSource, RecipeSource, SourceChunk};
pub use staging::{ChunkFetcher, Staging};
pub use state::{BatchBuffer, PhaseState, PhaseTracker};
pub use stats::{SessionReport, SessionStats, StatsSnapshot};

/// Requests a running session to stop reading new input. Everything already
/// read is drained through the pipeline and committed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Per-session state every phase borrows.
#[derive(Clone, Copy)]
pub(crate) struct PhaseContext<'a> {
    pub config: &'a XdedupConfig,
    pub client: &'a EnclaveClient,
    pub session: SessionId,
    pub staging: &'a Staging,
    pub book: &'a RecipeBook,
    pub stats: &'a SessionStats,
    pub cancel: &'a CancelToken,
    /// Set by the first failing phase. Downstream phases still drain, but
    /// the stream-end marker is withheld so nothing further is committed.
    pub abort: &'a AtomicBool,
}

impl PhaseContext<'_> {
    /// Mark the session aborted and attach the phase name to `err`.
    pub fn fail(&self, phase: &'static str, err: XdedupError) -> XdedupError {
        self.abort.store(true, Ordering::Release);
        let err = err.in_phase(phase);
        warn!(phase, session = self.session, error = %err, "phase failed");
        err
    }

    pub fn aborted(&self) -> bool {
        self.abort.load(Ordering::Acquire)
    }
}

/// Send downstream. Returns false if the consumer has gone away.
pub(crate) fn forward<T>(phase: &'static str, tx: &Sender<T>, msg: T) -> bool {
    if tx.send(msg).is_err() {
        debug!(phase, "downstream closed");
        return false;
    }
    true
}
