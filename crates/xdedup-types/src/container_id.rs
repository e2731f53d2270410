use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Width of a container id in bytes.
pub const CONTAINER_ID_SIZE: usize = 16;

/// Identifier of a data container, issued when the container is opened.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId(pub [u8; CONTAINER_ID_SIZE]);

impl ContainerId {
    /// Issue a fresh random container id.
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONTAINER_ID_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        ContainerId(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; CONTAINER_ID_SIZE] = bytes.try_into().ok()?;
        Some(ContainerId(arr))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Storage key for the sealed container: `containers/<shard>/<hex>`.
    pub fn storage_key(&self) -> String {
        format!("containers/{}/{}", hex::encode(&self.0[..1]), self.to_hex())
    }
}

impl fmt::Debug for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContainerId({})", self.to_hex())
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_differ() {
        assert_ne!(ContainerId::generate(), ContainerId::generate());
    }

    #[test]
    fn storage_key_is_sharded() {
        let id = ContainerId([0x0F; 16]);
        assert_eq!(
            id.storage_key(),
            "containers/0f/0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f0f"
        );
    }
}
