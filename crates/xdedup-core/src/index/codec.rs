use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use xdedup_crypto::aes_gcm::Aes256GcmEngine;
use xdedup_crypto::CryptoEngine;
use xdedup_types::fingerprint::{keyed_digest, Fingerprint};
use xdedup_types::recipe::RecipeEntry;

use crate::error::Result;

const BLINDING_LABEL: &[u8] = b"xdedup:index:blinding\0";
const FINGERPRINT_DOMAIN: &[u8] = b"xdedup:index:fingerprint\0";
const FEATURE_DOMAIN: &[u8] = b"xdedup:index:feature\0";
const TAG_FINGERPRINT: u8 = b'f';
const TAG_FEATURE: u8 = b's';

/// Value stored under a super-feature key: a raw chunk usable as a delta base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureHit {
    pub fingerprint: Fingerprint,
    pub entry: RecipeEntry,
}

/// Trusted-side translation between index entries and the opaque bytes the
/// untrusted store holds.
///
/// With `encrypt` on, keys are keyed BLAKE2b digests and values are AES-GCM
/// sealed and bound to their key. With it off, keys carry the raw
/// fingerprint and values are plain msgpack. Both flavours share one format
/// otherwise.
pub struct IndexCodec {
    blinding_key: [u8; 32],
    cipher: Option<Aes256GcmEngine>,
}

impl IndexCodec {
    pub fn new(index_key: &[u8; 32], encrypt: bool) -> Self {
        Self {
            blinding_key: keyed_digest(index_key, &[BLINDING_LABEL]),
            cipher: encrypt.then(|| Aes256GcmEngine::new(index_key)),
        }
    }

    pub fn is_encrypting(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn fingerprint_key(&self, fp: &Fingerprint) -> Vec<u8> {
        let mut out = Vec::with_capacity(33);
        out.push(TAG_FINGERPRINT);
        if self.cipher.is_some() {
            let digest = keyed_digest(&self.blinding_key, &[FINGERPRINT_DOMAIN, fp.as_bytes()]);
            out.extend_from_slice(&digest);
        } else {
            out.extend_from_slice(fp.as_bytes());
        }
        out
    }

    /// Key of super-feature `sf` at position `position`.
    pub fn feature_key(&self, position: usize, sf: u64) -> Vec<u8> {
        let pos = [position as u8];
        let sf = sf.to_le_bytes();
        let mut out = Vec::with_capacity(33);
        out.push(TAG_FEATURE);
        if self.cipher.is_some() {
            let digest = keyed_digest(&self.blinding_key, &[FEATURE_DOMAIN, &pos, &sf]);
            out.extend_from_slice(&digest);
        } else {
            out.extend_from_slice(&pos);
            out.extend_from_slice(&sf);
        }
        out
    }

    /// Serialize (and seal) a value stored under `key`.
    pub fn seal<T: Serialize>(&self, key: &[u8], value: &T) -> Result<Vec<u8>> {
        let plain = rmp_serde::to_vec(value)?;
        match &self.cipher {
            Some(cipher) => cipher.encrypt(&plain, key),
            None => Ok(plain),
        }
    }

    /// Open a value read back from under `key`.
    pub fn open<T: DeserializeOwned>(&self, key: &[u8], bytes: &[u8]) -> Result<T> {
        let plain = match &self.cipher {
            Some(cipher) => cipher.decrypt(bytes, key)?,
            None => bytes.to_vec(),
        };
        Ok(rmp_serde::from_slice(&plain)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdedup_types::container_id::ContainerId;
    use xdedup_types::error::XdedupError;

    fn entry() -> RecipeEntry {
        RecipeEntry {
            container_id: ContainerId([7; 16]),
            offset: 128,
            length: 4096,
        }
    }

    #[test]
    fn encrypted_keys_hide_fingerprints() {
        let codec = IndexCodec::new(&[1; 32], true);
        let fp = Fingerprint([0xAB; 32]);
        let key = codec.fingerprint_key(&fp);
        assert_eq!(key.len(), 33);
        assert!(!key.windows(32).any(|w| w == fp.as_bytes()));
        assert_eq!(key, codec.fingerprint_key(&fp));
        assert_ne!(key, IndexCodec::new(&[2; 32], true).fingerprint_key(&fp));
    }

    #[test]
    fn plain_keys_carry_fingerprint() {
        let codec = IndexCodec::new(&[1; 32], false);
        let fp = Fingerprint([0xAB; 32]);
        assert_eq!(&codec.fingerprint_key(&fp)[1..], fp.as_bytes());
    }

    #[test]
    fn feature_and_fingerprint_domains_differ() {
        for encrypt in [true, false] {
            let codec = IndexCodec::new(&[1; 32], encrypt);
            let fp_key = codec.fingerprint_key(&Fingerprint([5; 32]));
            assert_ne!(codec.feature_key(0, 5)[0], fp_key[0]);
            assert_ne!(codec.feature_key(0, 5), codec.feature_key(1, 5));
        }
    }

    #[test]
    fn values_roundtrip_in_both_modes() {
        for encrypt in [true, false] {
            let codec = IndexCodec::new(&[3; 32], encrypt);
            let key = codec.fingerprint_key(&Fingerprint([1; 32]));
            let sealed = codec.seal(&key, &entry()).unwrap();
            let opened: RecipeEntry = codec.open(&key, &sealed).unwrap();
            assert_eq!(opened, entry());
        }
    }

    #[test]
    fn sealed_value_is_bound_to_its_key() {
        let codec = IndexCodec::new(&[3; 32], true);
        let k1 = codec.fingerprint_key(&Fingerprint([1; 32]));
        let k2 = codec.fingerprint_key(&Fingerprint([2; 32]));
        let sealed = codec.seal(&k1, &entry()).unwrap();
        assert!(matches!(
            codec.open::<RecipeEntry>(&k2, &sealed),
            Err(XdedupError::DecryptionFailed)
        ));
    }
}
