pub mod local;
pub mod memory;

pub use local::LocalBackend;
pub use memory::MemoryBackend;

use xdedup_types::error::Result;

/// Key/value object storage holding one site's containers, recipes and index
/// snapshots. Keys are `/`-separated relative paths.
pub trait StorageBackend: Send + Sync {
    /// Read an object. Returns `None` if it does not exist.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write an object, replacing any previous value atomically.
    fn put(&self, key: &str, data: &[u8]) -> Result<()>;

    /// Remove an object. Missing keys are not an error.
    fn delete(&self, key: &str) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// List every key under `prefix`.
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Read `length` bytes starting at `offset`. Returns `None` if the object
    /// does not exist; a short read yields fewer bytes than requested.
    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>>;
}

impl<T: StorageBackend + ?Sized> StorageBackend for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        (**self).put(key, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key)
    }

    fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key)
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        (**self).list(prefix)
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        (**self).get_range(key, offset, length)
    }
}
