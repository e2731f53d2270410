//! Phase 5: encode unique chunks (raw or delta) and hand them to the sink.

use crossbeam_channel::Receiver;
use tracing::{debug, warn};

use super::messages::{BaseItem, Batch, Envelope, SinkMessage};
use super::sink::ChunkSink;
use super::state::PhaseTracker;
use super::PhaseContext;
use crate::container::ChunkKind;
use crate::error::{Result, XdedupError};
use crate::trusted::EncodeItem;

pub const PHASE: &str = "materialize";

pub(crate) fn run(
    ctx: PhaseContext<'_>,
    rx: Receiver<Envelope<BaseItem>>,
    sink: &mut dyn ChunkSink,
) -> Result<()> {
    let mut tracker = PhaseTracker::new(PHASE);
    let result = consume(&ctx, &rx, sink);
    tracker.draining();
    let result = result.and_then(|open| {
        if !open {
            return Ok(());
        }
        if ctx.aborted() {
            warn!(session = ctx.session, "upstream phase failed, stream end withheld");
            return Ok(());
        }
        deliver(sink, SinkMessage::StreamEnd).map(|_| ())
    });
    tracker.done();
    result.map_err(|e| ctx.fail(PHASE, e))
}

/// Returns whether the sink is still accepting messages.
fn consume(
    ctx: &PhaseContext<'_>,
    rx: &Receiver<Envelope<BaseItem>>,
    sink: &mut dyn ChunkSink,
) -> Result<bool> {
    for msg in rx {
        let open = match msg {
            Envelope::Batch(batch) => encode(ctx, batch, sink)?,
            Envelope::FileEnd(boundary) => deliver(sink, SinkMessage::FileEnd(boundary))?,
        };
        if !open {
            return Ok(false);
        }
    }
    Ok(true)
}

fn encode(ctx: &PhaseContext<'_>, batch: Batch<BaseItem>, sink: &mut dyn ChunkSink) -> Result<bool> {
    let items = batch
        .items
        .iter()
        .map(|item| {
            Ok(EncodeItem {
                fingerprint: item.fingerprint,
                features: item.features,
                data: ctx.staging.get(&item.fingerprint)?.as_ref().clone(),
                base: item.base,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let encoded = ctx.client.encode(ctx.session, items)?;

    for chunk in encoded {
        ctx.staging.release(&chunk.fingerprint);
        if chunk.kind == ChunkKind::Delta {
            ctx.stats.add_delta();
        }
        if !deliver(sink, SinkMessage::Chunk(chunk))? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// A sink that has gone away ends the phase quietly; any other failure is
/// an error.
fn deliver(sink: &mut dyn ChunkSink, msg: SinkMessage) -> Result<bool> {
    match sink.send(msg) {
        Ok(()) => Ok(true),
        Err(XdedupError::PeerClosed) => {
            debug!(phase = PHASE, "sink closed");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}
