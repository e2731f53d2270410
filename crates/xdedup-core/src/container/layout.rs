//! Typed cursors over flat byte buffers.
//!
//! `BoundedWriter` tracks remaining capacity and refuses to overflow;
//! `ByteReader` refuses to read past the end. Both use little-endian
//! integers.

use crate::error::{Result, XdedupError};

/// Append-only buffer with a hard capacity.
#[derive(Debug)]
pub struct BoundedWriter {
    buf: Vec<u8>,
    limit: usize,
    what: &'static str,
}

impl BoundedWriter {
    pub fn new(limit: usize, what: &'static str) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            what,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.limit - self.buf.len()
    }

    pub fn fits(&self, n: usize) -> bool {
        n <= self.remaining()
    }

    fn reserve(&mut self, n: usize) -> Result<()> {
        if !self.fits(n) {
            return Err(XdedupError::CapacityExceeded {
                what: self.what,
                needed: n,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn put_u8(&mut self, v: u8) -> Result<()> {
        self.reserve(1)?;
        self.buf.push(v);
        Ok(())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<()> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<()> {
        self.put_bytes(&v.to_le_bytes())
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?;
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Forward-only reader over a byte slice.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8], what: &'static str) -> Self {
        Self { data, pos: 0, what }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(XdedupError::Malformed(format!(
                "{}: need {n} bytes at offset {}, {} left",
                self.what,
                self.pos,
                self.remaining()
            )));
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    /// Everything not yet consumed.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.pos..];
        self.pos = self.data.len();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_refuses_overflow() {
        let mut w = BoundedWriter::new(6, "test buffer");
        w.put_u32(7).unwrap();
        assert_eq!(w.remaining(), 2);
        let err = w.put_u32(8).unwrap_err();
        assert!(matches!(
            err,
            XdedupError::CapacityExceeded {
                needed: 4,
                remaining: 2,
                ..
            }
        ));
        // Failed writes leave the buffer untouched.
        assert_eq!(w.len(), 4);
        w.put_bytes(b"ok").unwrap();
        assert!(!w.fits(1));
    }

    #[test]
    fn reader_walks_fields_and_stops_at_end() {
        let mut w = BoundedWriter::new(64, "test");
        w.put_u8(1).unwrap();
        w.put_u32(0xDEAD_BEEF).unwrap();
        w.put_u64(42).unwrap();
        w.put_bytes(b"tail").unwrap();
        let bytes = w.into_inner();

        let mut r = ByteReader::new(&bytes, "test");
        assert_eq!(r.u8().unwrap(), 1);
        assert_eq!(r.u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.u64().unwrap(), 42);
        assert_eq!(r.position(), 13);
        assert_eq!(r.rest(), b"tail");
        assert!(matches!(r.u8(), Err(XdedupError::Malformed(_))));
    }
}
