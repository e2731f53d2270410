use std::io::Read;

use crate::config::{CompressionAlgorithm, CompressionConfig};
use crate::error::{Result, XdedupError};

const TAG_NONE: u8 = 0x00;
const TAG_LZ4: u8 = 0x01;
const TAG_ZSTD: u8 = 0x02;

/// Upper bound on a decompressed chunk payload (twice the largest chunk the
/// chunker may cut). Guards against decompression bombs in stored records.
pub const MAX_DECOMPRESS_SIZE: u64 = 32 * 1024 * 1024;

/// Codec applied to a chunk payload before encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    None,
    #[default]
    Lz4,
    Zstd {
        level: i32,
    },
}

impl Compression {
    pub fn from_config(config: &CompressionConfig) -> Self {
        match config.algorithm {
            CompressionAlgorithm::None => Compression::None,
            CompressionAlgorithm::Lz4 => Compression::Lz4,
            CompressionAlgorithm::Zstd => Compression::Zstd {
                level: config.zstd_level,
            },
        }
    }
}

/// Compress `data` and prepend a 1-byte codec tag.
pub fn compress(compression: Compression, data: &[u8]) -> Result<Vec<u8>> {
    let (tag, body) = match compression {
        Compression::None => (TAG_NONE, data.to_vec()),
        Compression::Lz4 => (TAG_LZ4, lz4_flex::compress_prepend_size(data)),
        Compression::Zstd { level } => (
            TAG_ZSTD,
            zstd::bulk::compress(data, level)
                .map_err(|e| XdedupError::Other(format!("zstd compress: {e}")))?,
        ),
    };
    let mut out = Vec::with_capacity(1 + body.len());
    out.push(tag);
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decompress a tagged payload produced by [`compress`].
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    let (&tag, payload) = data
        .split_first()
        .ok_or_else(|| XdedupError::Decompression("empty payload".into()))?;
    match tag {
        TAG_NONE => Ok(payload.to_vec()),
        TAG_LZ4 => {
            let prefix: [u8; 4] = payload
                .get(..4)
                .and_then(|p| p.try_into().ok())
                .ok_or_else(|| XdedupError::Decompression("lz4: payload too short".into()))?;
            let size = u32::from_le_bytes(prefix) as u64;
            if size > MAX_DECOMPRESS_SIZE {
                return Err(XdedupError::Decompression(format!(
                    "lz4: declared size {size} exceeds {MAX_DECOMPRESS_SIZE} bytes"
                )));
            }
            lz4_flex::decompress_size_prepended(payload)
                .map_err(|e| XdedupError::Decompression(format!("lz4: {e}")))
        }
        TAG_ZSTD => {
            let decoder = zstd::stream::Decoder::new(payload)
                .map_err(|e| XdedupError::Decompression(format!("zstd init: {e}")))?;
            let mut out = Vec::new();
            decoder
                .take(MAX_DECOMPRESS_SIZE + 1)
                .read_to_end(&mut out)
                .map_err(|e| XdedupError::Decompression(format!("zstd: {e}")))?;
            if out.len() as u64 > MAX_DECOMPRESS_SIZE {
                return Err(XdedupError::Decompression(format!(
                    "zstd: output exceeds {MAX_DECOMPRESS_SIZE} bytes"
                )));
            }
            Ok(out)
        }
        other => Err(XdedupError::UnknownCompressionTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_codec_roundtrips() {
        let payload = b"repetitive payload, repetitive payload, repetitive payload".repeat(20);
        for codec in [
            Compression::None,
            Compression::Lz4,
            Compression::Zstd { level: 3 },
        ] {
            let packed = compress(codec, &payload).unwrap();
            assert_eq!(decompress(&packed).unwrap(), payload, "{codec:?}");
        }
    }

    #[test]
    fn compressible_input_shrinks() {
        let payload = vec![0u8; 64 * 1024];
        assert!(compress(Compression::Lz4, &payload).unwrap().len() < 1024);
    }

    #[test]
    fn rejects_lz4_bomb() {
        let mut data = vec![TAG_LZ4];
        data.extend_from_slice(&(1u32 << 30).to_le_bytes());
        data.extend_from_slice(&[0u8; 10]);
        assert!(matches!(
            decompress(&data),
            Err(XdedupError::Decompression(_))
        ));
    }

    #[test]
    fn rejects_unknown_tag_and_empty() {
        assert!(matches!(
            decompress(&[0x7F, 1, 2]),
            Err(XdedupError::UnknownCompressionTag(0x7F))
        ));
        assert!(decompress(&[]).is_err());
        assert!(decompress(&[TAG_LZ4, 0, 0]).is_err());
    }
}
