pub mod aes_gcm;
pub mod key;

use xdedup_types::error::Result;

/// Length of the per-payload initialization vector.
pub const IV_SIZE: usize = 12;

/// Trait for encrypting and decrypting chunk payloads and index values.
pub trait CryptoEngine: Send + Sync {
    /// Encrypt plaintext. Returns `[nonce][ciphertext+tag]`.
    /// `aad` is authenticated but not encrypted.
    fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Decrypt data produced by `encrypt`.
    /// `aad` must match what was passed during encryption.
    fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Encrypt plaintext and return `(ciphertext+tag, iv)` separately, for
    /// layouts that store the IV after the payload.
    fn encrypt_detached(&self, plaintext: &[u8], aad: &[u8]) -> Result<(Vec<u8>, [u8; IV_SIZE])>;

    /// Decrypt data produced by `encrypt_detached`.
    fn decrypt_detached(&self, ciphertext: &[u8], iv: &[u8; IV_SIZE], aad: &[u8])
        -> Result<Vec<u8>>;

    /// Whether this engine actually encrypts data.
    /// `PlaintextEngine` returns false; real ciphers return true.
    fn is_encrypting(&self) -> bool;
}

/// No-encryption engine. Emits an all-zero IV so the container layout is
/// identical in both modes.
pub struct PlaintextEngine;

impl CryptoEngine for PlaintextEngine {
    fn encrypt(&self, plaintext: &[u8], _aad: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, data: &[u8], _aad: &[u8]) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn encrypt_detached(&self, plaintext: &[u8], _aad: &[u8]) -> Result<(Vec<u8>, [u8; IV_SIZE])> {
        Ok((plaintext.to_vec(), [0u8; IV_SIZE]))
    }

    fn decrypt_detached(
        &self,
        ciphertext: &[u8],
        _iv: &[u8; IV_SIZE],
        _aad: &[u8],
    ) -> Result<Vec<u8>> {
        Ok(ciphertext.to_vec())
    }

    fn is_encrypting(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_encrypt_is_identity() {
        let encrypted = PlaintextEngine.encrypt(b"hello plaintext", b"aad").unwrap();
        assert_eq!(encrypted, b"hello plaintext");
    }

    #[test]
    fn plaintext_detached_uses_zero_iv() {
        let (ct, iv) = PlaintextEngine.encrypt_detached(b"data", b"aad").unwrap();
        assert_eq!(ct, b"data");
        assert_eq!(iv, [0u8; IV_SIZE]);
        let pt = PlaintextEngine
            .decrypt_detached(&ct, &iv, b"different_aad")
            .unwrap();
        assert_eq!(pt, b"data");
    }

    #[test]
    fn plaintext_is_not_encrypting() {
        assert!(!PlaintextEngine.is_encrypting());
    }
}
