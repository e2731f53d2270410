use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;
use xdedup_types::error::{Result, XdedupError};

use crate::StorageBackend;

/// A site directory on the local filesystem.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    /// Open (and create if needed) a site rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root)?;
        let root = fs::canonicalize(root)?;
        debug!(root = %root.display(), "opened local site storage");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reject keys that could escape the site root.
    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(XdedupError::InvalidFormat("unsafe storage key: empty".into()));
        }
        if key.starts_with('/') || key.contains('\\') {
            return Err(XdedupError::InvalidFormat(format!(
                "unsafe storage key: '{key}'"
            )));
        }
        if Path::new(key)
            .components()
            .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(XdedupError::InvalidFormat(format!(
                "unsafe storage key: parent traversal '{key}'"
            )));
        }
        Ok(())
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        Self::validate_key(key)?;
        Ok(self.root.join(key))
    }

    /// Write through a temp file in the target directory, then rename into
    /// place so readers never observe a partial object.
    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let dir = path.parent().unwrap_or(&self.root);
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(data)?;
        tmp.as_file().sync_data()?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }

    fn list_recursive(&self, dir: &Path, keys: &mut Vec<String>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            // In-flight or orphaned temp files from `atomic_write`.
            if entry.file_name().to_string_lossy().starts_with(".tmp") {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.list_recursive(&entry.path(), keys)?;
            } else if file_type.is_file() {
                if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                    let key = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy())
                        .collect::<Vec<_>>()
                        .join("/");
                    keys.push(key);
                }
            }
        }
        Ok(())
    }
}

impl StorageBackend for LocalBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        self.atomic_write(&path, data)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn exists(&self, key: &str) -> Result<bool> {
        let path = self.resolve(key)?;
        match fs::metadata(&path) {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.resolve(prefix.trim_end_matches('/'))?
        };
        match fs::metadata(&dir) {
            Ok(meta) if meta.is_dir() => {
                let mut keys = Vec::new();
                self.list_recursive(&dir, &mut keys)?;
                keys.sort();
                Ok(keys)
            }
            Ok(_) => Ok(Vec::new()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn get_range(&self, key: &str, offset: u64, length: u64) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::with_capacity(length as usize);
        file.take(length).read_to_end(&mut buf)?;
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> (tempfile::TempDir, LocalBackend) {
        let dir = tempfile::tempdir().unwrap();
        let backend = LocalBackend::open(dir.path()).unwrap();
        (dir, backend)
    }

    #[test]
    fn validate_key_rejects_unsafe_keys() {
        assert!(LocalBackend::validate_key("/etc/passwd").is_err());
        assert!(LocalBackend::validate_key("../../outside").is_err());
        assert!(LocalBackend::validate_key("containers/../../x").is_err());
        assert!(LocalBackend::validate_key("a\\b").is_err());
        assert!(LocalBackend::validate_key("").is_err());
    }

    #[test]
    fn validate_key_accepts_site_keys() {
        assert!(LocalBackend::validate_key("index/global").is_ok());
        assert!(LocalBackend::validate_key("containers/ab/abcdef").is_ok());
        assert!(LocalBackend::validate_key("recipes/0011").is_ok());
    }

    #[test]
    fn put_creates_parents_and_overwrites() {
        let (_dir, backend) = site();
        backend.put("containers/0a/0a11", b"v1").unwrap();
        assert_eq!(backend.get("containers/0a/0a11").unwrap().unwrap(), b"v1");
        backend.put("containers/0a/0a11", b"v2").unwrap();
        assert_eq!(backend.get("containers/0a/0a11").unwrap().unwrap(), b"v2");
    }

    #[test]
    fn missing_objects_are_none() {
        let (_dir, backend) = site();
        assert!(backend.get("nope").unwrap().is_none());
        assert!(backend.get_range("nope", 0, 4).unwrap().is_none());
        assert!(!backend.exists("nope").unwrap());
        assert!(backend.list("containers").unwrap().is_empty());
        backend.delete("nope").unwrap();
    }

    #[test]
    fn get_range_reads_window_and_short_tail() {
        let (_dir, backend) = site();
        backend.put("blob", b"0123456789").unwrap();
        assert_eq!(backend.get_range("blob", 2, 3).unwrap().unwrap(), b"234");
        assert_eq!(backend.get_range("blob", 8, 10).unwrap().unwrap(), b"89");
    }

    #[test]
    fn list_returns_sorted_relative_keys() {
        let (_dir, backend) = site();
        backend.put("recipes/b", b"1").unwrap();
        backend.put("recipes/a", b"2").unwrap();
        backend.put("index/global", b"3").unwrap();
        assert_eq!(backend.list("recipes/").unwrap(), vec!["recipes/a", "recipes/b"]);
        assert_eq!(backend.list("").unwrap().len(), 3);
    }
}
