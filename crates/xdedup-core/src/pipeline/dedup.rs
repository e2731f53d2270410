//! Phase 2: classify fingerprints against the locality cache and the global
//! index. Duplicates are dropped here; only globally unique fingerprints
//! continue downstream.

use crossbeam_channel::{Receiver, Sender};
use tracing::trace;
use xdedup_types::fingerprint::Fingerprint;

use super::messages::{Batch, ChunkRef, Envelope};
use super::recipe_book::Slot;
use super::state::PhaseTracker;
use super::{forward, PhaseContext};
use crate::error::Result;
use crate::trusted::DedupVerdict;

pub const PHASE: &str = "dedup";

pub(crate) fn run(
    ctx: PhaseContext<'_>,
    rx: Receiver<Envelope<ChunkRef>>,
    tx: Sender<Envelope<Fingerprint>>,
) -> Result<()> {
    let mut tracker = PhaseTracker::new(PHASE);
    let result = consume(&ctx, &rx, &tx);
    tracker.draining();
    tracker.done();
    result.map_err(|e| ctx.fail(PHASE, e))
}

fn consume(
    ctx: &PhaseContext<'_>,
    rx: &Receiver<Envelope<ChunkRef>>,
    tx: &Sender<Envelope<Fingerprint>>,
) -> Result<()> {
    let strategy = ctx.config.pipeline.strategy;
    for msg in rx {
        let out = match msg {
            Envelope::Batch(batch) => match classify(ctx, batch, strategy)? {
                Some(unique) => Envelope::Batch(unique),
                None => continue,
            },
            Envelope::FileEnd(boundary) => Envelope::FileEnd(boundary),
        };
        if !forward(PHASE, tx, out) {
            return Ok(());
        }
    }
    Ok(())
}

/// Record every chunk's slot in its recipe and return the unique ones.
fn classify(
    ctx: &PhaseContext<'_>,
    batch: Batch<ChunkRef>,
    strategy: crate::config::DedupStrategy,
) -> Result<Option<Batch<Fingerprint>>> {
    let fingerprints: Vec<Fingerprint> = batch.items.iter().map(|c| c.fingerprint).collect();
    let verdicts = ctx.client.dedup(ctx.session, fingerprints, strategy)?;

    let mut slots = Vec::with_capacity(batch.items.len());
    let mut unique = Vec::new();
    let mut unique_len = 0u64;
    for (chunk, verdict) in batch.items.iter().zip(verdicts) {
        let fp = chunk.fingerprint;
        match verdict {
            DedupVerdict::Duplicate { entry, source } => {
                slots.push(Slot::Resolved(entry));
                ctx.staging.release(&fp);
                ctx.stats.add_duplicate(source);
            }
            DedupVerdict::PendingDuplicate => {
                slots.push(Slot::Pending(fp));
                ctx.staging.release(&fp);
                ctx.stats.add_pending_duplicate();
            }
            DedupVerdict::Unique => {
                slots.push(Slot::Pending(fp));
                unique.push(fp);
                unique_len += chunk.len as u64;
                ctx.stats.add_unique(chunk.len as u64);
            }
        }
    }
    ctx.book.extend(batch.file_id, slots);
    trace!(
        file_id = batch.file_id,
        chunks = batch.items.len(),
        unique = unique.len(),
        "batch deduplicated"
    );

    if unique.is_empty() {
        return Ok(None);
    }
    Ok(Some(Batch {
        file_id: batch.file_id,
        items: unique,
        payload_len: unique_len,
    }))
}
