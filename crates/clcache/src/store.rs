//! Persistent storage of compiled kernel binaries
//!
//! Entries are raw backend binaries addressed by [`CacheKey`]. The on-disk
//! layout is flat, one file per key:
//!
//! ```text
//! <root>/
//!   834e095aa9923e5d.clb
//!   f00dfeedcafe0001.clb
//! ```
//!
//! Writes land in a temporary file beside the target and are renamed into
//! place, so two processes compiling the same kernel at once both succeed and
//! the last rename wins. Readers never observe a partially written binary.

use crate::key::CacheKey;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// File extension for cached binaries
pub const ENTRY_EXTENSION: &str = "clb";

/// Key-addressed storage for compiled binaries
pub trait BinaryStore: Send + Sync {
    /// Prepare the backing location. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error when the location cannot be created.
    fn prepare(&self) -> Result<()>;

    /// Read the binary stored for `key`.
    ///
    /// Missing and unreadable entries are both `None`.
    fn lookup(&self, key: &CacheKey) -> Option<Vec<u8>>;

    /// Store `binary` under `key`, replacing any existing entry.
    ///
    /// # Errors
    ///
    /// Returns an error when the entry cannot be written. Readers never see a
    /// partially written entry.
    fn store(&self, key: &CacheKey, binary: &[u8]) -> Result<()>;
}

/// A cached binary found on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    /// The key the entry is addressed by
    pub key: CacheKey,
    /// Path to the binary
    pub path: PathBuf,
    /// Binary size in bytes
    pub size: u64,
}

/// Directory-backed binary store
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`. Nothing is touched until [`BinaryStore::prepare`].
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The store's root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the entry for `key`
    #[must_use]
    pub fn entry_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{ENTRY_EXTENSION}", key.to_hex()))
    }

    /// List all entries in the store, ordered by key
    ///
    /// Files that are not named `<key>.clb` are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] when the root or an entry's metadata cannot be read.
    pub fn list(&self) -> Result<Vec<StoredEntry>> {
        let mut entries = Vec::new();
        if !self.root.exists() {
            return Ok(entries);
        }

        let dir = fs::read_dir(&self.root).map_err(|e| Error::io(e, &self.root, "read_dir"))?;
        for entry in dir {
            let entry = entry.map_err(|e| Error::io(e, &self.root, "read_dir_entry"))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<CacheKey>().ok())
            else {
                continue;
            };
            let metadata = entry
                .metadata()
                .map_err(|e| Error::io(e, &path, "metadata"))?;
            if !metadata.is_file() {
                continue;
            }
            entries.push(StoredEntry {
                key,
                path,
                size: metadata.len(),
            });
        }
        entries.sort_by_key(|e| e.key);
        Ok(entries)
    }
}

impl BinaryStore for FileStore {
    fn prepare(&self) -> Result<()> {
        fs::create_dir_all(&self.root).map_err(|e| Error::io(e, &self.root, "create_dir_all"))
    }

    fn lookup(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => {
                tracing::debug!(path = %path.display(), "Ignoring empty cache entry");
                None
            }
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Cache entry unreadable");
                None
            }
        }
    }

    fn store(&self, key: &CacheKey, binary: &[u8]) -> Result<()> {
        let path = self.entry_path(key);
        fs::create_dir_all(&self.root).map_err(|e| Error::io(e, &self.root, "create_dir_all"))?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp-")
            .suffix(".partial")
            .tempfile_in(&self.root)
            .map_err(|e| Error::io(e, &self.root, "create"))?;
        tmp.write_all(binary)
            .map_err(|e| Error::io(e, tmp.path(), "write"))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::io(e, tmp.path(), "sync"))?;
        tmp.persist(&path)
            .map_err(|e| Error::io(e.error, &path, "persist"))?;
        Ok(())
    }
}

/// Process-local store that forgets everything on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |entries| entries.len())
    }

    /// Whether the store holds no entries
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BinaryStore for MemoryStore {
    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    fn lookup(&self, key: &CacheKey) -> Option<Vec<u8>> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn store(&self, key: &CacheKey, binary: &[u8]) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| Error::backend("memory store lock poisoned"))?;
        entries.insert(*key, binary.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(n: u64) -> CacheKey {
        CacheKey::from_u64(n)
    }

    #[test]
    fn entry_path_uses_hex_and_extension() {
        let store = FileStore::new("/tmp/clcache");
        let path = store.entry_path(&key(0x834e_095a_a992_3e5d));
        assert_eq!(path, PathBuf::from("/tmp/clcache/834e095aa9923e5d.clb"));
    }

    #[test]
    fn prepare_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("nested/cache"));
        store.prepare().unwrap();
        store.prepare().unwrap();
        assert!(store.root().is_dir());
    }

    #[test]
    fn lookup_missing_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        assert!(store.lookup(&key(1)).is_none());
    }

    #[test]
    fn lookup_without_root_is_none() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("never-created"));
        assert!(store.lookup(&key(1)).is_none());
    }

    #[test]
    fn store_then_lookup() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        store.store(&key(7), b"binary").unwrap();
        assert_eq!(store.lookup(&key(7)).unwrap(), b"binary");
        assert!(store.entry_path(&key(7)).is_file());
    }

    #[test]
    fn store_creates_missing_root() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("a/b"));
        store.store(&key(7), b"binary").unwrap();
        assert_eq!(store.lookup(&key(7)).unwrap(), b"binary");
    }

    #[test]
    fn store_overwrites_existing_entry() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        store.store(&key(7), b"first").unwrap();
        store.store(&key(7), b"second").unwrap();
        assert_eq!(store.lookup(&key(7)).unwrap(), b"second");
    }

    #[test]
    fn store_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        store.store(&key(7), b"binary").unwrap();
        let names: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["0000000000000007.clb".to_string()]);
    }

    #[test]
    fn empty_entry_is_treated_as_missing() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        fs::write(store.entry_path(&key(3)), b"").unwrap();
        assert!(store.lookup(&key(3)).is_none());
    }

    #[test]
    fn list_skips_foreign_files() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        store.store(&key(2), b"bb").unwrap();
        store.store(&key(1), b"a").unwrap();
        fs::write(temp.path().join("notes.txt"), b"x").unwrap();
        fs::write(temp.path().join("not-a-key.clb"), b"x").unwrap();
        fs::create_dir(temp.path().join("00000000000000ff.clb")).unwrap();

        let entries = store.list().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].key, key(1));
        assert_eq!(entries[0].size, 1);
        assert_eq!(entries[1].key, key(2));
        assert_eq!(entries[1].size, 2);
    }

    #[test]
    fn list_missing_root_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path().join("missing"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn concurrent_writers_of_same_key_do_not_corrupt() {
        let temp = TempDir::new().unwrap();
        let store = FileStore::new(temp.path());
        store.prepare().unwrap();

        let payloads: Vec<Vec<u8>> = (0u8..8).map(|i| vec![i; 64 * 1024]).collect();
        std::thread::scope(|s| {
            for payload in &payloads {
                let store = &store;
                s.spawn(move || store.store(&key(9), payload).unwrap());
            }
        });

        let stored = store.lookup(&key(9)).unwrap();
        assert!(payloads.contains(&stored), "stored entry is a torn write");
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.store(&key(5), b"bin").unwrap();
        assert_eq!(store.lookup(&key(5)).unwrap(), b"bin");
        assert!(store.lookup(&key(6)).is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn poisoned_memory_store_is_a_backend_error() {
        let store = MemoryStore::new();
        let poisoner = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = store.entries.write().unwrap();
                panic!("writer died holding the lock");
            })
            .join()
        });
        assert!(poisoner.is_err());

        let err = store.store(&key(1), b"bin").unwrap_err();
        assert!(matches!(err, Error::Backend { .. }), "got {err:?}");
        assert!(store.lookup(&key(1)).is_none());
    }
}
