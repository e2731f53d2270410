use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use xdedup_types::error::{Result, XdedupError};
use xdedup_types::fingerprint::keyed_digest;

const DATA_KEY_LABEL: &[u8] = b"xdedup:data-key:v1";
const FINGERPRINT_KEY_LABEL: &[u8] = b"xdedup:fingerprint-key:v1";
const INDEX_KEY_LABEL: &[u8] = b"xdedup:index-key:v1";

/// Key material of a trusted session. Published once at session start and
/// read-only afterwards. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Encrypts chunk payloads stored in containers.
    pub data_key: [u8; 32],
    /// Keys the chunk fingerprint MAC.
    pub fingerprint_key: [u8; 32],
    /// Blinds index keys and seals index values.
    pub index_key: [u8; 32],
}

/// Serialized payload inside the wrapped key blob.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct SessionKeysPayload {
    data_key: Vec<u8>,
    fingerprint_key: Vec<u8>,
    index_key: Vec<u8>,
}

/// KDF parameters stored alongside the wrapped keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    pub algorithm: String,
    pub time_cost: u32,
    pub memory_cost: u32,
    pub parallelism: u32,
    pub salt: Vec<u8>,
}

impl KdfParams {
    /// Argon2id with 64 MiB memory and a fresh random salt.
    pub fn generate() -> Self {
        let mut salt = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut salt);
        Self {
            algorithm: "argon2id".to_string(),
            time_cost: 3,
            memory_cost: 65536,
            parallelism: 4,
            salt,
        }
    }
}

/// On-disk format stored at `keys/sitekey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappedKeys {
    pub kdf: KdfParams,
    pub nonce: Vec<u8>,
    pub encrypted_payload: Vec<u8>,
}

impl SessionKeys {
    /// Generate independent random keys using OS entropy.
    pub fn generate() -> Self {
        let mut data_key = [0u8; 32];
        let mut fingerprint_key = [0u8; 32];
        let mut index_key = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut data_key);
        rand::rngs::OsRng.fill_bytes(&mut fingerprint_key);
        rand::rngs::OsRng.fill_bytes(&mut index_key);
        Self {
            data_key,
            fingerprint_key,
            index_key,
        }
    }

    /// Derive all session keys from one shared secret. Two sites holding the
    /// same secret derive identical keys, so their fingerprints agree.
    pub fn derive(secret: &[u8; 32]) -> Self {
        Self {
            data_key: keyed_digest(secret, &[DATA_KEY_LABEL]),
            fingerprint_key: keyed_digest(secret, &[FINGERPRINT_KEY_LABEL]),
            index_key: keyed_digest(secret, &[INDEX_KEY_LABEL]),
        }
    }

    /// Wrap the keys with a passphrase using Argon2id + AES-256-GCM.
    pub fn to_wrapped(&self, passphrase: &str) -> Result<WrappedKeys> {
        self.to_wrapped_with(passphrase, KdfParams::generate())
    }

    /// Wrap the keys with explicit KDF parameters.
    pub fn to_wrapped_with(&self, passphrase: &str, kdf: KdfParams) -> Result<WrappedKeys> {
        let wrapping_key = derive_key_from_passphrase(passphrase, &kdf)?;

        let payload = SessionKeysPayload {
            data_key: self.data_key.to_vec(),
            fingerprint_key: self.fingerprint_key.to_vec(),
            index_key: self.index_key.to_vec(),
        };
        let plaintext = Zeroizing::new(rmp_serde::to_vec(&payload)?);

        // KDF params are bound as AAD so they cannot be swapped undetected.
        let kdf_aad = kdf_params_aad(&kdf)?;
        let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
            .map_err(|e| XdedupError::KeyDerivation(format!("cipher init: {e}")))?;
        let mut nonce_bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let ciphertext = cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext.as_ref(),
                    aad: &kdf_aad,
                },
            )
            .map_err(|e| XdedupError::KeyDerivation(format!("encrypt: {e}")))?;

        Ok(WrappedKeys {
            kdf,
            nonce: nonce_bytes.to_vec(),
            encrypted_payload: ciphertext,
        })
    }

    /// Unwrap keys from their on-disk format.
    pub fn from_wrapped(wrapped: &WrappedKeys, passphrase: &str) -> Result<Self> {
        let wrapping_key = derive_key_from_passphrase(passphrase, &wrapped.kdf)?;
        let cipher = Aes256Gcm::new_from_slice(wrapping_key.as_ref())
            .map_err(|_| XdedupError::DecryptionFailed)?;
        if wrapped.nonce.len() != 12 {
            return Err(XdedupError::DecryptionFailed);
        }
        let kdf_aad = kdf_params_aad(&wrapped.kdf)?;
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&wrapped.nonce),
                Payload {
                    msg: wrapped.encrypted_payload.as_ref(),
                    aad: &kdf_aad,
                },
            )
            .map_err(|_| XdedupError::DecryptionFailed)?;
        let plaintext = Zeroizing::new(plaintext);

        let payload: SessionKeysPayload =
            rmp_serde::from_slice(&plaintext).map_err(|_| XdedupError::DecryptionFailed)?;

        Ok(Self {
            data_key: to_key(&payload.data_key)?,
            fingerprint_key: to_key(&payload.fingerprint_key)?,
            index_key: to_key(&payload.index_key)?,
        })
    }
}

fn to_key(bytes: &[u8]) -> Result<[u8; 32]> {
    bytes.try_into().map_err(|_| XdedupError::DecryptionFailed)
}

fn kdf_params_aad(kdf: &KdfParams) -> Result<Vec<u8>> {
    rmp_serde::to_vec(kdf)
        .map_err(|e| XdedupError::KeyDerivation(format!("serialize kdf aad: {e}")))
}

/// Derive a 32-byte key from a passphrase using Argon2id.
fn derive_key_from_passphrase(passphrase: &str, kdf: &KdfParams) -> Result<Zeroizing<[u8; 32]>> {
    if kdf.algorithm != "argon2id" {
        return Err(XdedupError::KeyDerivation(format!(
            "unsupported kdf '{}'",
            kdf.algorithm
        )));
    }
    let params = argon2::Params::new(kdf.memory_cost, kdf.time_cost, kdf.parallelism, Some(32))
        .map_err(|e| XdedupError::KeyDerivation(format!("argon2 params: {e}")))?;
    let argon2 = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, params);

    let mut output = Zeroizing::new([0u8; 32]);
    argon2
        .hash_password_into(passphrase.as_bytes(), &kdf.salt, output.as_mut())
        .map_err(|e| XdedupError::KeyDerivation(format!("argon2 hash: {e}")))?;
    Ok(output)
}
