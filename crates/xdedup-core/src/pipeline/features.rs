//! Phase 3: super-features of unique chunks.

use crossbeam_channel::{Receiver, Sender};
use xdedup_types::fingerprint::Fingerprint;

use super::messages::{Batch, Envelope, FeatureItem};
use super::state::PhaseTracker;
use super::{forward, PhaseContext};
use crate::error::Result;
use crate::features::SUPER_FEATURE_PER_CHUNK;

pub const PHASE: &str = "features";

pub(crate) fn run(
    ctx: PhaseContext<'_>,
    rx: Receiver<Envelope<Fingerprint>>,
    tx: Sender<Envelope<FeatureItem>>,
) -> Result<()> {
    let mut tracker = PhaseTracker::new(PHASE);
    let result = consume(&ctx, &rx, &tx);
    tracker.draining();
    tracker.done();
    result.map_err(|e| ctx.fail(PHASE, e))
}

fn consume(
    ctx: &PhaseContext<'_>,
    rx: &Receiver<Envelope<Fingerprint>>,
    tx: &Sender<Envelope<FeatureItem>>,
) -> Result<()> {
    for msg in rx {
        let out = match msg {
            Envelope::Batch(batch) => Envelope::Batch(extract(ctx, batch)?),
            Envelope::FileEnd(boundary) => Envelope::FileEnd(boundary),
        };
        if !forward(PHASE, tx, out) {
            return Ok(());
        }
    }
    Ok(())
}

fn extract(ctx: &PhaseContext<'_>, batch: Batch<Fingerprint>) -> Result<Batch<FeatureItem>> {
    let features = if ctx.config.features.enabled {
        let chunks = batch
            .items
            .iter()
            .map(|fp| ctx.staging.get(fp).map(|data| data.as_ref().clone()))
            .collect::<Result<Vec<_>>>()?;
        ctx.client.compute_features(ctx.session, chunks)?
    } else {
        vec![[0u64; SUPER_FEATURE_PER_CHUNK]; batch.items.len()]
    };
    let items = batch
        .items
        .into_iter()
        .zip(features)
        .map(|(fingerprint, features)| FeatureItem {
            fingerprint,
            features,
        })
        .collect();
    Ok(Batch {
        file_id: batch.file_id,
        items,
        payload_len: batch.payload_len,
    })
}
