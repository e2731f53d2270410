use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use rand::RngCore;

use super::{CryptoEngine, IV_SIZE};
use xdedup_types::error::{Result, XdedupError};

/// Size of the GCM authentication tag appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// AES-256-GCM authenticated encryption engine.
pub struct Aes256GcmEngine {
    cipher: Aes256Gcm,
}

impl Aes256GcmEngine {
    pub fn new(encryption_key: &[u8; 32]) -> Self {
        let cipher =
            Aes256Gcm::new_from_slice(encryption_key).expect("valid 32-byte key for AES-256-GCM");
        Self { cipher }
    }

    fn random_iv() -> [u8; IV_SIZE] {
        let mut iv = [0u8; IV_SIZE];
        rand::thread_rng().fill_bytes(&mut iv);
        iv
    }
}

impl CryptoEngine for Aes256GcmEngine {
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let (ciphertext, iv) = self.encrypt_detached(plaintext, aad)?;

        // Wire format: [12-byte nonce][ciphertext with appended 16-byte tag]
        let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if data.len() < IV_SIZE + TAG_SIZE {
            return Err(XdedupError::DecryptionFailed);
        }
        let (iv, ciphertext) = data.split_at(IV_SIZE);
        let iv: &[u8; IV_SIZE] = iv.try_into().map_err(|_| XdedupError::DecryptionFailed)?;
        self.decrypt_detached(ciphertext, iv, aad)
    }

    fn encrypt_detached(&self, plaintext: &[u8], aad: &[u8]) -> Result<(Vec<u8>, [u8; IV_SIZE])> {
        let iv = Self::random_iv();
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&iv), payload)
            .map_err(|e| XdedupError::Other(format!("AES-GCM encrypt: {e}")))?;
        Ok((ciphertext, iv))
    }

    fn decrypt_detached(
        &self,
        ciphertext: &[u8],
        iv: &[u8; IV_SIZE],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(XdedupError::DecryptionFailed);
        }
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        self.cipher
            .decrypt(Nonce::from_slice(iv), payload)
            .map_err(|_| XdedupError::DecryptionFailed)
    }

    fn is_encrypting(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Aes256GcmEngine {
        Aes256GcmEngine::new(&[0x11; 32])
    }

    #[test]
    fn roundtrip() {
        let e = engine();
        let ct = e.encrypt(b"secret chunk", b"aad").unwrap();
        assert_ne!(&ct[IV_SIZE..], b"secret chunk");
        assert_eq!(e.decrypt(&ct, b"aad").unwrap(), b"secret chunk");
    }

    #[test]
    fn detached_roundtrip_and_tag_overhead() {
        let e = engine();
        let (ct, iv) = e.encrypt_detached(b"abc", b"x").unwrap();
        assert_eq!(ct.len(), 3 + TAG_SIZE);
        assert_eq!(e.decrypt_detached(&ct, &iv, b"x").unwrap(), b"abc");
    }

    #[test]
    fn wrong_aad_fails() {
        let e = engine();
        let ct = e.encrypt(b"data", b"aad1").unwrap();
        assert!(matches!(
            e.decrypt(&ct, b"aad2"),
            Err(XdedupError::DecryptionFailed)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let ct = engine().encrypt(b"data", b"").unwrap();
        let other = Aes256GcmEngine::new(&[0x22; 32]);
        assert!(other.decrypt(&ct, b"").is_err());
    }

    #[test]
    fn truncated_input_fails() {
        assert!(engine().decrypt(&[0u8; 10], b"").is_err());
    }

    #[test]
    fn ivs_are_fresh() {
        let e = engine();
        let (_, iv1) = e.encrypt_detached(b"same", b"").unwrap();
        let (_, iv2) = e.encrypt_detached(b"same", b"").unwrap();
        assert_ne!(iv1, iv2);
    }
}
