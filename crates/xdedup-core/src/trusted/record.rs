//! Plaintext layout of a stored chunk, before encryption:
//! `[kind: u8][delta only: base container (16) ∥ base offset (u32) ∥ base length (u32)][codec-tagged payload]`.

use xdedup_types::container_id::{ContainerId, CONTAINER_ID_SIZE};
use xdedup_types::recipe::RecipeEntry;

use crate::container::layout::{BoundedWriter, ByteReader};
use crate::container::ChunkKind;
use crate::error::Result;

const BASE_REF_LEN: usize = CONTAINER_ID_SIZE + 4 + 4;

/// Parsed view of a decrypted chunk record.
#[derive(Debug)]
pub struct ChunkRecord<'a> {
    pub kind: ChunkKind,
    pub base: Option<RecipeEntry>,
    pub payload: &'a [u8],
}

pub fn encode(base: Option<&RecipeEntry>, payload: &[u8]) -> Result<Vec<u8>> {
    let header = 1 + if base.is_some() { BASE_REF_LEN } else { 0 };
    let mut w = BoundedWriter::new(header + payload.len(), "chunk record");
    match base {
        None => w.put_u8(ChunkKind::Raw.to_byte())?,
        Some(entry) => {
            w.put_u8(ChunkKind::Delta.to_byte())?;
            w.put_bytes(&entry.container_id.0)?;
            w.put_u32(entry.offset)?;
            w.put_u32(entry.length)?;
        }
    }
    w.put_bytes(payload)?;
    Ok(w.into_inner())
}

pub fn parse(bytes: &[u8]) -> Result<ChunkRecord<'_>> {
    let mut r = ByteReader::new(bytes, "chunk record");
    let kind = ChunkKind::from_byte(r.u8()?)?;
    let base = match kind {
        ChunkKind::Raw => None,
        ChunkKind::Delta => Some(RecipeEntry {
            container_id: ContainerId(r.array()?),
            offset: r.u32()?,
            length: r.u32()?,
        }),
    };
    Ok(ChunkRecord {
        kind,
        base,
        payload: r.rest(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_and_delta_headers() {
        let raw = encode(None, b"payload").unwrap();
        assert_eq!(raw.len(), 1 + 7);
        let parsed = parse(&raw).unwrap();
        assert_eq!(parsed.kind, ChunkKind::Raw);
        assert!(parsed.base.is_none());
        assert_eq!(parsed.payload, b"payload");

        let base = RecipeEntry {
            container_id: ContainerId([4; 16]),
            offset: 77,
            length: 900,
        };
        let delta = encode(Some(&base), b"d").unwrap();
        assert_eq!(delta.len(), 1 + BASE_REF_LEN + 1);
        let parsed = parse(&delta).unwrap();
        assert_eq!(parsed.kind, ChunkKind::Delta);
        assert_eq!(parsed.base, Some(base));
        assert_eq!(parsed.payload, b"d");
    }

    #[test]
    fn truncated_delta_header_is_malformed() {
        assert!(parse(&[1, 0, 0]).is_err());
        assert!(parse(&[]).is_err());
    }
}
