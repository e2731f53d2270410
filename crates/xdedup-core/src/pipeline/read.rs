//! Phase 1: read files, fingerprint their chunks, stage the bytes.
//!
//! Chunks a source already knows the fingerprint of are staged by location
//! and only fetched if a later phase needs their bytes.

use crossbeam_channel::Sender;
use tracing::{debug, info};

use super::messages::{Batch, ChunkRef, Envelope, FileBoundary};
use super::source::{ChunkSource, SourceChunk};
use super::state::{BatchBuffer, PhaseTracker};
use super::{forward, PhaseContext};
use crate::error::{Result, XdedupError};

pub const PHASE: &str = "read";

pub(crate) fn run(
    ctx: PhaseContext<'_>,
    source: &mut dyn ChunkSource,
    tx: Sender<Envelope<ChunkRef>>,
) -> Result<()> {
    let mut tracker = PhaseTracker::new(PHASE);
    let result = produce(&ctx, source, &tx);
    tracker.draining();
    tracker.done();
    result.map_err(|e| ctx.fail(PHASE, e))
}

fn produce(
    ctx: &PhaseContext<'_>,
    source: &mut dyn ChunkSource,
    tx: &Sender<Envelope<ChunkRef>>,
) -> Result<()> {
    let batch_size = ctx.config.pipeline.batch_size;
    let mut file_id = 0u64;

    while let Some(header) = source.next_file()? {
        if ctx.cancel.is_cancelled() {
            info!(next_file = %header.name, "session cancelled, no further input read");
            return Ok(());
        }
        let mut buffer: BatchBuffer<SourceChunk> = BatchBuffer::new(file_id, batch_size);
        let mut size = 0u64;
        while let Some(chunk) = source.next_chunk()? {
            let len = chunk.len();
            size += len;
            if buffer.push(chunk, len) {
                if ctx.cancel.is_cancelled() {
                    info!(file = %header.name, "session cancelled mid-file, file not committed");
                    return Ok(());
                }
                if !emit(ctx, tx, buffer.take())? {
                    return Ok(());
                }
            }
        }
        if !emit(ctx, tx, buffer.take())? {
            return Ok(());
        }
        if size != header.size {
            return Err(XdedupError::Malformed(format!(
                "file '{}' produced {size} bytes, expected {}",
                header.name, header.size
            )));
        }

        debug!(file = %header.name, file_id, size, "file read");
        ctx.stats.add_file();
        let boundary = FileBoundary {
            file_id,
            name: header.name,
            size,
        };
        if !forward(PHASE, tx, Envelope::FileEnd(boundary)) {
            return Ok(());
        }
        file_id += 1;
    }
    Ok(())
}

/// Stage a batch and forward its fingerprints. Plaintext chunks are
/// fingerprinted inside the trusted module; stored chunks arrive with theirs.
fn emit(
    ctx: &PhaseContext<'_>,
    tx: &Sender<Envelope<ChunkRef>>,
    batch: Option<Batch<SourceChunk>>,
) -> Result<bool> {
    let Some(batch) = batch else {
        return Ok(true);
    };
    let mut refs: Vec<Option<ChunkRef>> = Vec::with_capacity(batch.items.len());
    let mut plain = Vec::new();
    let mut plain_at = Vec::new();
    for chunk in batch.items {
        match chunk {
            SourceChunk::Data(data) => {
                plain_at.push(refs.len());
                plain.push(data);
                refs.push(None);
            }
            SourceChunk::Stored {
                fingerprint,
                location,
                len,
            } => {
                ctx.staging.stage_stored(fingerprint, location, len);
                refs.push(Some(ChunkRef { fingerprint, len }));
            }
        }
    }
    if !plain.is_empty() {
        let fingerprints = ctx.client.fingerprint(ctx.session, plain.clone())?;
        for ((at, data), fingerprint) in plain_at.into_iter().zip(plain).zip(fingerprints) {
            refs[at] = Some(ChunkRef {
                fingerprint,
                len: data.len() as u32,
            });
            ctx.staging.stage(fingerprint, data);
        }
    }
    let refs: Vec<ChunkRef> = refs.into_iter().flatten().collect();
    ctx.stats.add_chunks(refs.len() as u64, batch.payload_len);
    Ok(forward(
        PHASE,
        tx,
        Envelope::Batch(Batch {
            file_id: batch.file_id,
            items: refs,
            payload_len: batch.payload_len,
        }),
    ))
}
