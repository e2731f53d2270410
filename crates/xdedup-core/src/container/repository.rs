use std::sync::Arc;

use tracing::trace;
use xdedup_crypto::IV_SIZE;
use xdedup_storage::StorageBackend;
use xdedup_types::container_id::ContainerId;
use xdedup_types::recipe::RecipeEntry;

use super::layout::ByteReader;
use super::{
    ContainerImage, ContainerPersistence, ContainerReader, MetaRecord, StoredChunk,
    META_LEN_PREFIX, META_RECORD_SIZE,
};
use crate::error::{Result, XdedupError};

const CONTAINER_PREFIX: &str = "containers/";

/// Sealed containers of one site, on top of its storage backend.
#[derive(Clone)]
pub struct ContainerRepository {
    storage: Arc<dyn StorageBackend>,
}

impl ContainerRepository {
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// Ids of every stored container.
    pub fn list(&self) -> Result<Vec<ContainerId>> {
        let mut ids = Vec::new();
        for key in self.storage.list(CONTAINER_PREFIX)? {
            let name = key.rsplit('/').next().unwrap_or_default();
            let id = hex::decode(name)
                .ok()
                .and_then(|bytes| ContainerId::from_slice(&bytes))
                .ok_or_else(|| {
                    XdedupError::InvalidFormat(format!("unexpected container key '{key}'"))
                })?;
            ids.push(id);
        }
        Ok(ids)
    }

    /// Length of a container's metadata session, from its 4-byte prefix.
    fn meta_len(&self, id: ContainerId, key: &str) -> Result<u64> {
        let prefix = self
            .storage
            .get_range(key, 0, META_LEN_PREFIX as u64)?
            .ok_or(XdedupError::ContainerNotFound(id))?;
        let prefix: [u8; META_LEN_PREFIX] = prefix
            .as_slice()
            .try_into()
            .map_err(|_| XdedupError::ContainerCorrupt {
                container: id,
                reason: "missing metadata length".into(),
            })?;
        Ok(u32::from_le_bytes(prefix) as u64)
    }
}

impl ContainerPersistence for ContainerRepository {
    fn write_container(&self, id: &ContainerId, bytes: &[u8]) -> Result<()> {
        self.storage.put(&id.storage_key(), bytes)
    }
}

impl ContainerReader for ContainerRepository {
    fn read_container(&self, id: &ContainerId) -> Result<ContainerImage> {
        let bytes = self
            .storage
            .get(&id.storage_key())?
            .ok_or(XdedupError::ContainerNotFound(*id))?;
        trace!(container = %id, bytes = bytes.len(), "read container");
        ContainerImage::parse(*id, &bytes)
    }

    fn read_records(&self, id: &ContainerId) -> Result<Vec<MetaRecord>> {
        let key = id.storage_key();
        let meta_len = self.meta_len(*id, &key)? as usize;
        if meta_len % META_RECORD_SIZE != 0 {
            return Err(XdedupError::ContainerCorrupt {
                container: *id,
                reason: format!("metadata length {meta_len} is not a whole number of records"),
            });
        }
        let meta = self
            .storage
            .get_range(&key, META_LEN_PREFIX as u64, meta_len as u64)?
            .ok_or(XdedupError::ContainerNotFound(*id))?;
        if meta.len() != meta_len {
            return Err(XdedupError::ContainerCorrupt {
                container: *id,
                reason: format!("metadata truncated at {} of {meta_len} bytes", meta.len()),
            });
        }
        let mut r = ByteReader::new(&meta, "metadata session");
        let mut records = Vec::with_capacity(meta_len / META_RECORD_SIZE);
        while r.remaining() > 0 {
            records.push(MetaRecord::read_from(&mut r)?);
        }
        trace!(container = %id, records = records.len(), "read container metadata");
        Ok(records)
    }

    fn read_chunk(&self, entry: &RecipeEntry) -> Result<StoredChunk> {
        let id = entry.container_id;
        let key = id.storage_key();
        let meta_len = self.meta_len(id, &key)?;

        let start = META_LEN_PREFIX as u64 + meta_len + entry.offset as u64;
        let want = entry.length as usize + IV_SIZE;
        let data = self
            .storage
            .get_range(&key, start, want as u64)?
            .ok_or(XdedupError::ContainerNotFound(id))?;
        if data.len() != want {
            return Err(XdedupError::ContainerCorrupt {
                container: id,
                reason: format!(
                    "short read at {start}: expected {want} bytes, got {}",
                    data.len()
                ),
            });
        }
        let (ciphertext, iv) = data.split_at(entry.length as usize);
        let mut iv_arr = [0u8; IV_SIZE];
        iv_arr.copy_from_slice(iv);
        Ok(StoredChunk {
            ciphertext: ciphertext.to_vec(),
            iv: iv_arr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContainerConfig;
    use crate::container::{ChunkKind, ContainerStore, EncodedChunk};
    use xdedup_storage::MemoryBackend;
    use xdedup_types::fingerprint::Fingerprint;

    fn chunk(n: u8, len: usize) -> EncodedChunk {
        EncodedChunk {
            fingerprint: Fingerprint([n; 32]),
            features: [0; 3],
            kind: ChunkKind::Raw,
            chunk_len: len as u32,
            ciphertext: vec![n; len],
            iv: [n; IV_SIZE],
        }
    }

    #[test]
    fn range_reads_match_whole_container_reads() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let repo = Arc::new(ContainerRepository::new(storage));
        let mut store = ContainerStore::new(&ContainerConfig::default(), repo.clone());
        let entries: Vec<_> = (1..=4u8)
            .map(|n| store.save_chunk(&chunk(n, 100 + n as usize)).unwrap().entry)
            .collect();
        let sealed = store.flush().unwrap().unwrap();

        let image = repo.read_container(&sealed.id).unwrap();
        for entry in &entries {
            let ranged = repo.read_chunk(entry).unwrap();
            assert_eq!(ranged, image.chunk(entry.offset, entry.length).unwrap());
        }
        assert_eq!(repo.list().unwrap(), vec![sealed.id]);
        assert_eq!(repo.read_records(&sealed.id).unwrap(), sealed.records);
    }

    #[test]
    fn missing_container_is_not_found() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let repo = ContainerRepository::new(storage);
        let id = ContainerId([9; 16]);
        assert!(matches!(
            repo.read_container(&id),
            Err(XdedupError::ContainerNotFound(_))
        ));
        let entry = RecipeEntry {
            container_id: id,
            offset: 0,
            length: 1,
        };
        assert!(matches!(
            repo.read_chunk(&entry),
            Err(XdedupError::ContainerNotFound(_))
        ));
    }

    #[test]
    fn truncated_container_is_corrupt() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let repo = ContainerRepository::new(storage.clone());
        let id = ContainerId([3; 16]);
        let mut bytes = 0u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[1u8; 8]);
        storage.put(&id.storage_key(), &bytes).unwrap();
        let entry = RecipeEntry {
            container_id: id,
            offset: 0,
            length: 8,
        };
        assert!(matches!(
            repo.read_chunk(&entry),
            Err(XdedupError::ContainerCorrupt { .. })
        ));
    }
}
