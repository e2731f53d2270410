use fastcdc::v2020::FastCDC;
use tracing::trace;

use crate::config::ChunkerConfig;
use crate::error::{Result, XdedupError};

// FastCDC 2020 parameter limits; its constructor asserts on these.
const MINIMUM_MIN: u32 = 64;
const MINIMUM_MAX: u32 = 1_048_576;
const AVERAGE_MIN: u32 = 256;
const AVERAGE_MAX: u32 = 4_194_304;
const MAXIMUM_MIN: u32 = 1024;
const MAXIMUM_MAX: u32 = 16_777_216;

/// One cut: `[offset, offset + length)` of the loaded buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub offset: usize,
    pub length: usize,
}

impl ChunkSpan {
    pub fn end(&self) -> usize {
        self.offset + self.length
    }

    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.offset..self.end()]
    }
}

/// Check `(min, avg, max)` against each other and the gear-hash limits.
pub fn validate_bounds(min: u32, avg: u32, max: u32) -> Result<()> {
    if !(MINIMUM_MIN..=MINIMUM_MAX).contains(&min) {
        return Err(XdedupError::InvalidChunkerParams(format!(
            "min_size {min} outside [{MINIMUM_MIN}, {MINIMUM_MAX}]"
        )));
    }
    if !(AVERAGE_MIN..=AVERAGE_MAX).contains(&avg) {
        return Err(XdedupError::InvalidChunkerParams(format!(
            "avg_size {avg} outside [{AVERAGE_MIN}, {AVERAGE_MAX}]"
        )));
    }
    if !(MAXIMUM_MIN..=MAXIMUM_MAX).contains(&max) {
        return Err(XdedupError::InvalidChunkerParams(format!(
            "max_size {max} outside [{MAXIMUM_MIN}, {MAXIMUM_MAX}]"
        )));
    }
    if min > avg || avg > max {
        return Err(XdedupError::InvalidChunkerParams(format!(
            "expected min <= avg <= max, got {min} / {avg} / {max}"
        )));
    }
    Ok(())
}

/// Content-defined chunker over FastCDC with normalized (dual-mask) cut points.
///
/// Between `min` and the normal size the wide mask makes a cut more likely;
/// between the normal size and `max` the narrow mask pushes toward larger
/// chunks; at `max` the cut is forced. A remainder of at most `min` bytes is
/// emitted whole.
#[derive(Debug)]
pub struct Chunker {
    min_size: u32,
    avg_size: u32,
    max_size: u32,
    chunks_emitted: u64,
    bytes_chunked: u64,
}

impl Chunker {
    pub fn new(config: &ChunkerConfig) -> Result<Self> {
        validate_bounds(config.min_size, config.avg_size, config.max_size)?;
        Ok(Self {
            min_size: config.min_size,
            avg_size: config.avg_size,
            max_size: config.max_size,
            chunks_emitted: 0,
            bytes_chunked: 0,
        })
    }

    /// Threshold where the cut mask switches from wide to narrow.
    pub fn normal_size(&self) -> u32 {
        self.avg_size.min(self.max_size)
    }

    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Length of the first chunk of `data`, or 0 for an empty buffer.
    pub fn next_cut(&self, data: &[u8]) -> usize {
        if data.is_empty() {
            return 0;
        }
        FastCDC::new(data, self.min_size, self.normal_size(), self.max_size)
            .next()
            .map(|chunk| chunk.length)
            .unwrap_or(data.len())
    }

    /// Split a loaded buffer into contiguous chunks covering all of it.
    pub fn chunk(&mut self, data: &[u8]) -> Vec<ChunkSpan> {
        let spans: Vec<ChunkSpan> =
            FastCDC::new(data, self.min_size, self.normal_size(), self.max_size)
                .map(|chunk| ChunkSpan {
                    offset: chunk.offset,
                    length: chunk.length,
                })
                .collect();
        self.chunks_emitted += spans.len() as u64;
        self.bytes_chunked += data.len() as u64;
        trace!(bytes = data.len(), chunks = spans.len(), "chunked buffer");
        spans
    }

    /// Chunks emitted over all loads.
    pub fn chunks_emitted(&self) -> u64 {
        self.chunks_emitted
    }

    /// Bytes chunked over all loads.
    pub fn bytes_chunked(&self) -> u64 {
        self.bytes_chunked
    }
}
