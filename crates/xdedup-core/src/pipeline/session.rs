use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::ScopedJoinHandle;
use std::time::Instant;

use tracing::{debug, info, warn};

use super::sink::{ChannelSink, DestinationWriter, WriterSummary};
use super::source::ChunkSource;
use super::stats::{SessionReport, SessionStats};
use super::{dedup, features, materialize, read, resolve};
use super::{CancelToken, PhaseContext, RecipeBook, Staging};
use crate::config::XdedupConfig;
use crate::container::ContainerPersistence;
use crate::error::{ErrorKind, Result, XdedupError};
use crate::index::IndexStore;
use crate::recipe::RecipeStore;
use crate::trusted::EnclaveClient;

/// One upload or sync run into a destination site.
///
/// Owns nothing long-lived: every run opens its own trusted session,
/// staging area and recipe book, and tears them down when it returns.
pub struct SyncSession<'a> {
    config: &'a XdedupConfig,
    client: EnclaveClient,
    persistence: Arc<dyn ContainerPersistence>,
    index: Arc<dyn IndexStore>,
    recipes: RecipeStore,
    cancel: CancelToken,
}

fn join<T>(name: &'static str, handle: ScopedJoinHandle<'_, Result<T>>) -> Result<T> {
    handle
        .join()
        .unwrap_or_else(|_| Err(XdedupError::Other(format!("{name} thread panicked"))))
}

impl<'a> SyncSession<'a> {
    pub fn new(
        config: &'a XdedupConfig,
        client: EnclaveClient,
        persistence: Arc<dyn ContainerPersistence>,
        index: Arc<dyn IndexStore>,
        recipes: RecipeStore,
    ) -> Self {
        Self {
            config,
            client,
            persistence,
            index,
            recipes,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Stream every file of `source` through the pipeline into the
    /// destination.
    pub fn run(&self, source: &mut dyn ChunkSource) -> Result<SessionReport> {
        let started = Instant::now();
        let session = self.client.open_session()?;
        info!(
            session,
            strategy = %self.config.pipeline.strategy,
            features = self.config.features.enabled,
            "sync session started"
        );

        let staging = match source.fetcher() {
            Some(fetcher) => Staging::with_fetcher(fetcher),
            None => Staging::new(),
        };
        let book = RecipeBook::new();
        let stats = SessionStats::default();
        let abort = AtomicBool::new(false);
        let ctx = PhaseContext {
            config: self.config,
            client: &self.client,
            session,
            staging: &staging,
            book: &book,
            stats: &stats,
            cancel: &self.cancel,
            abort: &abort,
        };
        let writer = DestinationWriter::new(
            &self.config.container,
            self.client.clone(),
            session,
            self.persistence.clone(),
            self.index.clone(),
            self.recipes.clone(),
            &book,
            &stats,
        );

        let queue = self.config.pipeline.queue_capacity;
        let sink_queue = queue * self.config.pipeline.batch_size;
        let (results, summary) = std::thread::scope(|s| {
            let (read_tx, read_rx) = crossbeam_channel::bounded(queue);
            let (dedup_tx, dedup_rx) = crossbeam_channel::bounded(queue);
            let (feat_tx, feat_rx) = crossbeam_channel::bounded(queue);
            let (resolve_tx, resolve_rx) = crossbeam_channel::bounded(queue);
            let (sink_tx, sink_rx) = crossbeam_channel::bounded(sink_queue);

            let h_read = s.spawn(move || read::run(ctx, source, read_tx));
            let h_dedup = s.spawn(move || dedup::run(ctx, read_rx, dedup_tx));
            let h_features = s.spawn(move || features::run(ctx, dedup_rx, feat_tx));
            let h_resolve = s.spawn(move || resolve::run(ctx, feat_rx, resolve_tx));
            let h_materialize = s.spawn(move || {
                let mut sink = ChannelSink::new(sink_tx);
                materialize::run(ctx, resolve_rx, &mut sink)
            });
            let h_writer = s.spawn(move || writer.drain(sink_rx));

            let results = [
                (read::PHASE, join(read::PHASE, h_read)),
                (dedup::PHASE, join(dedup::PHASE, h_dedup)),
                (features::PHASE, join(features::PHASE, h_features)),
                (resolve::PHASE, join(resolve::PHASE, h_resolve)),
                (materialize::PHASE, join(materialize::PHASE, h_materialize)),
            ];
            let summary = join("writer", h_writer);
            (results, summary)
        });

        let summary = summary.map_err(|e| {
            let e = e.in_phase("writer");
            warn!(session, error = %e, "destination writer failed");
            e
        });
        if let Err(e) = self.client.close_session(session) {
            warn!(session, error = %e, "failed to close trusted session");
        }
        if !staging.is_empty() {
            debug!(session, leftover = staging.len(), "staged chunks not consumed");
        }

        let mut first_err = results.into_iter().find_map(|(_, r)| r.err());
        let summary = match summary {
            Ok(summary) => summary,
            Err(e) => {
                first_err.get_or_insert(e);
                WriterSummary::default()
            }
        };
        if let Some(err) = first_err {
            if err.kind() != ErrorKind::Transient {
                return Err(err);
            }
            info!(session, error = %err, "peer closed, session ended early");
        }

        let report = SessionReport {
            session,
            files: summary.committed,
            stats: stats.snapshot(),
            completed: summary.completed,
            cancelled: self.cancel.is_cancelled(),
            elapsed: started.elapsed(),
        };
        info!(
            session,
            files = report.files.len(),
            chunks = report.stats.chunks,
            unique = report.stats.unique_chunks,
            stored_bytes = report.stats.stored_bytes,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "sync session finished"
        );
        Ok(report)
    }
}
