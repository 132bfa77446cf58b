//! Named blob storage for persisted artifacts.
//!
//! Every persisted artifact is addressed by a [`StorageKey`] made of an
//! artifact kind (e.g. `ordinal_regression`, `dataframe`) and a caller-chosen
//! name. Backends only see opaque bytes.
//!
//! Two implementations are provided:
//! - [`FileStore`]: one file per key under a root directory, written atomically.
//! - [`InMemoryStore`]: a process-local map, used by tests and short-lived runs.
//!
//! Backends do not serialize concurrent writers to the same key; callers that
//! share a key across threads must order those operations themselves.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

const BLOB_EXTENSION: &str = "blob";
const MAX_SEGMENT_LEN: usize = 128;

/// Composite `(kind, name)` address of a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey {
    kind: String,
    name: String,
}

impl StorageKey {
    /// Build a key, rejecting segments that could escape a filesystem root.
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Result<Self, StorageError> {
        let kind = kind.into();
        let name = name.into();
        validate_segment("kind", &kind)?;
        validate_segment("name", &name)?;
        Ok(Self { kind, name })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn not_found(&self) -> StorageError {
        StorageError::NotFound {
            kind: self.kind.clone(),
            name: self.name.clone(),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

fn validate_segment(field: &'static str, value: &str) -> Result<(), StorageError> {
    let invalid = |reason: &str| StorageError::InvalidKey {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    if value.is_empty() {
        return Err(invalid("must not be empty"));
    }
    if value.len() > MAX_SEGMENT_LEN {
        return Err(invalid("must be at most 128 characters"));
    }
    if value.starts_with('.') {
        return Err(invalid("must not start with '.'"));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        return Err(invalid(&format!("character '{c}' is not allowed")));
    }
    Ok(())
}

/// Trait for blob storage backends.
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Store `blob` under `key`, replacing any previous value.
    fn put(&self, key: &StorageKey, blob: &[u8]) -> Result<(), StorageError>;

    /// Retrieve the blob stored under `key`.
    fn get(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError>;

    /// Remove the blob stored under `key`. Fails with `NotFound` if absent.
    fn delete(&self, key: &StorageKey) -> Result<(), StorageError>;

    /// Check whether a blob exists under `key`.
    fn exists(&self, key: &StorageKey) -> Result<bool, StorageError>;

    /// List the names stored under `kind`, sorted.
    fn list(&self, kind: &str) -> Result<Vec<String>, StorageError>;
}

/// Filesystem-backed store: `<root>/<kind>/<name>.blob`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `root`. The directory is created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &StorageKey) -> PathBuf {
        self.root
            .join(key.kind())
            .join(format!("{}.{BLOB_EXTENSION}", key.name()))
    }
}

/// Write to a uniquely named sibling then rename over the target, so readers
/// never observe a partially written blob.
fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp, data).map_err(|e| StorageError::io(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(StorageError::io(path, e));
    }
    Ok(())
}

impl BlobStore for FileStore {
    fn put(&self, key: &StorageKey, blob: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key);
        atomic_write(&path, blob)?;
        tracing::debug!(%key, bytes = blob.len(), path = %path.display(), "Stored blob");
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(key);
        match std::fs::read(&path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(key.not_found()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(%key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(key.not_found()),
            Err(e) => Err(StorageError::io(path, e)),
        }
    }

    fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(self.path_for(key).is_file())
    }

    fn list(&self, kind: &str) -> Result<Vec<String>, StorageError> {
        validate_segment("kind", kind)?;
        let dir = self.root.join(kind);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| StorageError::io(&dir, e))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(BLOB_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// In-memory store for tests and ephemeral sessions.
///
/// Thread-safe via `Mutex<HashMap>`. Does not persist across process restarts.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    blobs: Mutex<HashMap<StorageKey, Vec<u8>>>,
}

impl InMemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<StorageKey, Vec<u8>>>, StorageError> {
        self.blobs.lock().map_err(|e| StorageError::Backend {
            message: format!("in-memory store lock poisoned: {e}"),
        })
    }
}

impl BlobStore for InMemoryStore {
    fn put(&self, key: &StorageKey, blob: &[u8]) -> Result<(), StorageError> {
        self.lock()?.insert(key.clone(), blob.to_vec());
        tracing::trace!(%key, bytes = blob.len(), "Stored blob in memory");
        Ok(())
    }

    fn get(&self, key: &StorageKey) -> Result<Vec<u8>, StorageError> {
        self.lock()?
            .get(key)
            .cloned()
            .ok_or_else(|| key.not_found())
    }

    fn delete(&self, key: &StorageKey) -> Result<(), StorageError> {
        self.lock()?
            .remove(key)
            .map(|_| ())
            .ok_or_else(|| key.not_found())
    }

    fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(self.lock()?.contains_key(key))
    }

    fn list(&self, kind: &str) -> Result<Vec<String>, StorageError> {
        let mut names: Vec<String> = self
            .lock()?
            .keys()
            .filter(|k| k.kind() == kind)
            .map(|k| k.name().to_string())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(kind: &str, name: &str) -> StorageKey {
        StorageKey::new(kind, name).unwrap()
    }

    fn exercise_store(store: &dyn BlobStore) {
        let k = key("dataframe", "wines");
        assert!(!store.exists(&k).unwrap());

        store.put(&k, b"first").unwrap();
        assert!(store.exists(&k).unwrap());
        assert_eq!(store.get(&k).unwrap(), b"first");

        store.put(&k, b"second").unwrap();
        assert_eq!(store.get(&k).unwrap(), b"second");

        store.delete(&k).unwrap();
        assert!(!store.exists(&k).unwrap());
        assert!(matches!(
            store.get(&k).unwrap_err(),
            StorageError::NotFound { .. }
        ));
        assert!(matches!(
            store.delete(&k).unwrap_err(),
            StorageError::NotFound { .. }
        ));
    }

    #[test]
    fn test_key_validation() {
        assert!(StorageKey::new("ordinal_regression", "OrdinalRegressionTest").is_ok());
        assert!(StorageKey::new("model", "v1.2-final").is_ok());
        assert!(StorageKey::new("", "x").is_err());
        assert!(StorageKey::new("model", "").is_err());
        assert!(StorageKey::new("model", "../escape").is_err());
        assert!(StorageKey::new("model", "a/b").is_err());
        assert!(StorageKey::new("model", ".hidden").is_err());
        assert!(StorageKey::new("model", "x".repeat(129)).is_err());
    }

    #[test]
    fn test_key_display() {
        assert_eq!(key("min_max_scaler", "run1").to_string(), "min_max_scaler/run1");
    }

    #[test]
    fn test_in_memory_store_lifecycle() {
        exercise_store(&InMemoryStore::new());
    }

    #[test]
    fn test_file_store_lifecycle() {
        let dir = TempDir::new().unwrap();
        exercise_store(&FileStore::new(dir.path()));
    }

    #[test]
    fn test_file_store_layout_and_no_tmp_leftover() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        store.put(&key("linear_regression", "prices"), b"{}").unwrap();

        let kind_dir = dir.path().join("linear_regression");
        assert!(kind_dir.join("prices.blob").is_file());
        let leftovers: Vec<_> = std::fs::read_dir(&kind_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_list_is_scoped_by_kind_and_sorted() {
        let dir = TempDir::new().unwrap();
        let stores: Vec<Box<dyn BlobStore>> = vec![
            Box::new(InMemoryStore::new()),
            Box::new(FileStore::new(dir.path())),
        ];
        for store in &stores {
            store.put(&key("dataframe", "b"), b"1").unwrap();
            store.put(&key("dataframe", "a"), b"2").unwrap();
            store.put(&key("one_hot_encoder", "a"), b"3").unwrap();
            assert_eq!(store.list("dataframe").unwrap(), vec!["a", "b"]);
            assert_eq!(store.list("one_hot_encoder").unwrap(), vec!["a"]);
            assert!(store.list("ordinal_regression").unwrap().is_empty());
        }
    }

    #[test]
    fn test_file_store_reopen_sees_previous_writes() {
        let dir = TempDir::new().unwrap();
        FileStore::new(dir.path())
            .put(&key("dataframe", "persisted"), b"payload")
            .unwrap();
        let reopened = FileStore::new(dir.path());
        assert_eq!(
            reopened.get(&key("dataframe", "persisted")).unwrap(),
            b"payload"
        );
    }
}
