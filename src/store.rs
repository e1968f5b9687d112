//! Key/value byte storage for documents and metadata
//!
//! Keys are `/`-separated relative paths such as
//! `specs/sample-api/v1.0.0/spec.json`. `FsStore` maps them onto a directory
//! and makes every write atomic: temp file, fsync, rename.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use walkdir::WalkDir;

use crate::error::{RegistryError, Result};

/// Storage the registry persists through
pub trait DocumentStore: Send + Sync {
    /// Read the bytes stored under `key`; `Ok(None)` if absent
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Replace the bytes under `key` atomically
    fn write(&self, key: &str, data: &[u8]) -> Result<()>;

    fn exists(&self, key: &str) -> Result<bool>;

    /// All keys starting with `prefix`, sorted
    fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove `key`; removing an absent key is not an error
    fn delete(&self, key: &str) -> Result<()>;
}

/// Filesystem-backed store rooted at a directory
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| RegistryError::io("create store root", &root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| part.is_empty() || part == "." || part == "..") {
            return Err(RegistryError::invalid("storage key", key, "must be a relative path without '.' or '..'"));
        }
        Ok(self.root.join(key))
    }
}

impl DocumentStore for FsStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.resolve(key)?;
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RegistryError::io("read", path, e)),
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.resolve(key)?;
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        fs::create_dir_all(&parent).map_err(|e| RegistryError::io("create directory", &parent, e))?;

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("document");
        let temp_path = parent.join(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4().simple()));

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(|e| RegistryError::io("create temp file", &temp_path, e))?;

        let written = file
            .write_all(data)
            .and_then(|_| file.sync_all())
            .map_err(|e| RegistryError::io("write temp file", &temp_path, e));
        if let Err(e) = written {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        drop(file);

        if let Err(e) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(RegistryError::io("rename", &path, e));
        }

        // Make the rename itself durable
        if let Ok(dir) = File::open(&parent) {
            let _ = dir.sync_all();
        }
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.resolve(key)?.is_file())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
                let source = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
                RegistryError::io("list", path, source)
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            // In-flight temp files are not documents
            if key.rsplit('/').next().is_some_and(|name| name.starts_with('.')) {
                continue;
            }
            if key.starts_with(prefix) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(RegistryError::io("delete", path, e)),
        }
        // Drop the version directory once it is empty; failure just leaves it behind
        if let Some(parent) = path.parent() {
            if parent != self.root && fs::read_dir(parent).map(|mut d| d.next().is_none()).unwrap_or(false) {
                let _ = fs::remove_dir(parent);
            }
        }
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries().get(key).cloned())
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<()> {
        self.entries().insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.entries().contains_key(key))
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_fs_store_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();

        assert_eq!(store.read("specs/a/metadata.json").unwrap(), None);
        store.write("specs/a/metadata.json", b"{}").unwrap();
        store.write("specs/a/v1.0.0/spec.json", b"{\"openapi\":\"3.0.3\"}").unwrap();
        store.write("specs/a/v1.0.0/spec.json", b"{\"openapi\":\"3.1.0\"}").unwrap();

        assert!(store.exists("specs/a/metadata.json").unwrap());
        assert_eq!(
            store.read("specs/a/v1.0.0/spec.json").unwrap().unwrap(),
            b"{\"openapi\":\"3.1.0\"}".to_vec()
        );
        assert_eq!(
            store.list("specs/a/").unwrap(),
            vec!["specs/a/metadata.json".to_string(), "specs/a/v1.0.0/spec.json".to_string()]
        );

        store.delete("specs/a/v1.0.0/spec.json").unwrap();
        store.delete("specs/a/v1.0.0/spec.json").unwrap();
        assert!(!dir.path().join("specs/a/v1.0.0").exists());
    }

    #[test]
    fn test_fs_store_rejects_escaping_keys() {
        let dir = tempdir().unwrap();
        let store = FsStore::open(dir.path()).unwrap();
        assert!(store.write("../outside.json", b"x").is_err());
        assert!(store.read("specs//a").is_err());
    }

    #[test]
    fn test_memory_store_list_prefix() {
        let store = MemoryStore::new();
        store.write("specs/a/metadata.json", b"1").unwrap();
        store.write("specs/b/metadata.json", b"2").unwrap();
        assert_eq!(store.list("specs/b").unwrap(), vec!["specs/b/metadata.json".to_string()]);
    }
}
