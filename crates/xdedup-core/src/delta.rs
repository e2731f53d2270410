//! Prefix/suffix delta against a similar base chunk.
//!
//! Encoding: `prefix_len (u32 LE) ∥ suffix_len (u32 LE) ∥ replacement bytes`.
//! The target is `base[..prefix] ∥ replacement ∥ base[base.len() - suffix..]`.

use crate::container::layout::{BoundedWriter, ByteReader};
use crate::error::{Result, XdedupError};

const HEADER_LEN: usize = 8;

/// Encode `target` relative to `base`.
pub fn encode(base: &[u8], target: &[u8]) -> Vec<u8> {
    let limit = base.len().min(target.len());
    let prefix = base
        .iter()
        .zip(target)
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = base[prefix..]
        .iter()
        .rev()
        .zip(target[prefix..].iter().rev())
        .take(limit - prefix)
        .take_while(|(a, b)| a == b)
        .count();

    let middle = &target[prefix..target.len() - suffix];
    let mut out = Vec::with_capacity(HEADER_LEN + middle.len());
    out.extend_from_slice(&(prefix as u32).to_le_bytes());
    out.extend_from_slice(&(suffix as u32).to_le_bytes());
    out.extend_from_slice(middle);
    out
}

/// Rebuild the target from `base` and an encoded delta.
pub fn decode(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut reader = ByteReader::new(delta, "delta");
    let prefix = reader.u32()? as usize;
    let suffix = reader.u32()? as usize;
    let middle = reader.rest();
    if prefix.checked_add(suffix).map_or(true, |n| n > base.len()) {
        return Err(XdedupError::Malformed(format!(
            "delta copies {prefix}+{suffix} bytes from a {}-byte base",
            base.len()
        )));
    }
    let mut out = BoundedWriter::new(prefix + middle.len() + suffix, "delta target");
    out.put_bytes(&base[..prefix])?;
    out.put_bytes(middle)?;
    out.put_bytes(&base[base.len() - suffix..])?;
    Ok(out.into_inner())
}

/// Whether a delta of `delta_len` is small enough to replace a chunk of `chunk_len`.
pub fn worthwhile(delta_len: usize, chunk_len: usize, max_ratio: f64) -> bool {
    (delta_len as f64) <= max_ratio * chunk_len as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_edit_yields_small_delta() {
        let base: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let mut target = base.clone();
        target[2000..2010].copy_from_slice(b"0123456789");

        let delta = encode(&base, &target);
        assert_eq!(delta.len(), HEADER_LEN + 10);
        assert!(worthwhile(delta.len(), target.len(), 0.5));
        assert_eq!(decode(&base, &delta).unwrap(), target);
    }

    #[test]
    fn handles_growth_and_shrink() {
        let base = b"hello brave new world".to_vec();
        for target in [
            b"hello world".to_vec(),
            b"hello brave, bold and new world".to_vec(),
            b"".to_vec(),
            b"completely different".to_vec(),
        ] {
            let delta = encode(&base, &target);
            assert_eq!(decode(&base, &delta).unwrap(), target);
        }
    }

    #[test]
    fn overlapping_prefix_and_suffix_stay_in_bounds() {
        let base = b"aaaa".to_vec();
        let target = b"aaaaaa".to_vec();
        let delta = encode(&base, &target);
        assert_eq!(decode(&base, &delta).unwrap(), target);
    }

    #[test]
    fn decode_rejects_oversized_copy() {
        let mut delta = Vec::new();
        delta.extend_from_slice(&10u32.to_le_bytes());
        delta.extend_from_slice(&10u32.to_le_bytes());
        assert!(matches!(
            decode(b"short", &delta),
            Err(XdedupError::Malformed(_))
        ));
        assert!(decode(b"short", &[1, 2, 3]).is_err());
    }
}
