use blake2::digest::consts::U32;
use blake2::digest::Mac;
use blake2::Blake2bMac;
use serde::{Deserialize, Serialize};
use std::fmt;

type KeyedBlake2b256 = Blake2bMac<U32>;

/// Width of a fingerprint in bytes.
pub const FINGERPRINT_SIZE: usize = 32;

/// A 32-byte chunk fingerprint computed as keyed BLAKE2b-256.
///
/// Two chunks with equal fingerprints are treated as identical content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; FINGERPRINT_SIZE]);

impl Fingerprint {
    /// Compute a fingerprint using keyed BLAKE2b-256 (BLAKE2b-MAC with 32-byte output).
    pub fn compute(key: &[u8; 32], data: &[u8]) -> Self {
        Fingerprint(keyed_digest(key, &[data]))
    }

    /// Parse a fingerprint from a byte slice of exactly [`FINGERPRINT_SIZE`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; FINGERPRINT_SIZE] = bytes.try_into().ok()?;
        Some(Fingerprint(arr))
    }

    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_SIZE] {
        &self.0
    }

    /// Hex-encode the full fingerprint.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Keyed BLAKE2b-256 over the concatenation of `parts`.
pub fn keyed_digest(key: &[u8; 32], parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = KeyedBlake2b256::new_from_slice(key).expect("valid 32-byte key for BLAKE2b");
    for part in parts {
        Mac::update(&mut hasher, part);
    }
    let result = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&result.into_bytes());
    out
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}
