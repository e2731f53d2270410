use std::collections::HashMap;
use std::sync::Mutex;

use xdedup_types::error::Result;

use crate::StorageBackend;

/// In-memory backend for tests and ephemeral sites.
#[derive(Default)]
pub struct MemoryBackend {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects under `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        let map = self.data.lock().unwrap();
        map.keys().filter(|k| k.starts_with(prefix)).count()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).cloned())
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut map = self.data.lock().unwrap();
        map.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let map = self.data.lock().unwrap();
        Ok(map.contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let map = self.data.lock().unwrap();
        let mut keys: Vec<String> = map
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        let map = self.data.lock().unwrap();
        Ok(map.get(key).map(|data| {
            let start = (offset as usize).min(data.len());
            let end = start.saturating_add(length as usize).min(data.len());
            data[start..end].to_vec()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_reads_clamp_to_object() {
        let backend = MemoryBackend::new();
        backend.put("k", b"abcdef").unwrap();
        assert_eq!(backend.get_range("k", 1, 2).unwrap().unwrap(), b"bc");
        assert_eq!(backend.get_range("k", 4, 10).unwrap().unwrap(), b"ef");
        assert!(backend.get_range("k", 10, 1).unwrap().unwrap().is_empty());
        assert!(backend.get_range("missing", 0, 1).unwrap().is_none());
    }

    #[test]
    fn list_and_count_by_prefix() {
        let backend = MemoryBackend::new();
        backend.put("containers/aa/1", b"x").unwrap();
        backend.put("containers/bb/2", b"y").unwrap();
        backend.put("recipes/r", b"z").unwrap();
        assert_eq!(backend.count("containers/"), 2);
        assert_eq!(
            backend.list("containers/").unwrap(),
            vec!["containers/aa/1", "containers/bb/2"]
        );
        backend.delete("recipes/r").unwrap();
        assert!(!backend.exists("recipes/r").unwrap());
    }
}
