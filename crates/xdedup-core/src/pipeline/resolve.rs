//! Phase 4: pick a similar stored chunk to delta-encode against.

use crossbeam_channel::{Receiver, Sender};

use super::messages::{BaseItem, Batch, Envelope, FeatureItem};
use super::state::PhaseTracker;
use super::{forward, PhaseContext};
use crate::error::Result;

pub const PHASE: &str = "resolve";

pub(crate) fn run(
    ctx: PhaseContext<'_>,
    rx: Receiver<Envelope<FeatureItem>>,
    tx: Sender<Envelope<BaseItem>>,
) -> Result<()> {
    let mut tracker = PhaseTracker::new(PHASE);
    let result = consume(&ctx, &rx, &tx);
    tracker.draining();
    tracker.done();
    result.map_err(|e| ctx.fail(PHASE, e))
}

fn consume(
    ctx: &PhaseContext<'_>,
    rx: &Receiver<Envelope<FeatureItem>>,
    tx: &Sender<Envelope<BaseItem>>,
) -> Result<()> {
    for msg in rx {
        let out = match msg {
            Envelope::Batch(batch) => Envelope::Batch(resolve(ctx, batch)?),
            Envelope::FileEnd(boundary) => Envelope::FileEnd(boundary),
        };
        if !forward(PHASE, tx, out) {
            return Ok(());
        }
    }
    Ok(())
}

fn resolve(ctx: &PhaseContext<'_>, batch: Batch<FeatureItem>) -> Result<Batch<BaseItem>> {
    let bases = if ctx.config.features.enabled {
        let queries = batch
            .items
            .iter()
            .map(|item| (item.fingerprint, item.features))
            .collect();
        ctx.client.resolve_bases(ctx.session, queries)?
    } else {
        vec![None; batch.items.len()]
    };
    let items = batch
        .items
        .into_iter()
        .zip(bases)
        .map(|(item, base)| BaseItem {
            fingerprint: item.fingerprint,
            features: item.features,
            base,
        })
        .collect();
    Ok(Batch {
        file_id: batch.file_id,
        items,
        payload_len: batch.payload_len,
    })
}
