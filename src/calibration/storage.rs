//! Durable key-value storage for calibration fields.
//!
//! Each calibration field is kept as one structured-text blob under a fixed key
//! (see [`ConfigField::storage_key`](super::ConfigField::storage_key)). Storage is
//! only read on startup or explicit load and only written on explicit save.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

use crate::error::{ConsoleError, ConsoleResult};

/// Minimal string key-value store.
pub trait KeyValueStore: Send + Sync {
    /// Read the blob stored under `key`.
    fn get(&self, key: &str) -> ConsoleResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous blob.
    fn set(&self, key: &str, value: &str) -> ConsoleResult<()>;
}

/// In-memory store, for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> ConsoleResult<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| ConsoleError::Storage("memory store poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> ConsoleResult<()> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| ConsoleError::Storage("memory store poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Store backed by a single JSON object on disk.
///
/// Writes go to a sibling temp file first and are renamed into place.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Use the file at `path`. It is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> ConsoleResult<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let text = fs::read_to_string(&self.path)?;
        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&text).map_err(|e| {
            ConsoleError::Storage(format!("{} is corrupt: {e}", self.path.display()))
        })
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> ConsoleResult<Option<String>> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| ConsoleError::Storage("file store poisoned".into()))?;
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> ConsoleResult<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| ConsoleError::Storage("file store poisoned".into()))?;
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&entries)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(key, path = %self.path.display(), "stored calibration blob");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("calibration.json");

        let store = FileStore::new(&path);
        assert_eq!(store.get("CAMERA_POSE").unwrap(), None);
        store.set("CAMERA_POSE", "[]").unwrap();
        store.set("WORLD_MATRIX", "[[1]]").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("CAMERA_POSE").unwrap().as_deref(), Some("[]"));
        assert_eq!(reopened.get("WORLD_MATRIX").unwrap().as_deref(), Some("[[1]]"));
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(&path, "{oops").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(store.get("CAMERA_POSE"), Err(ConsoleError::Storage(_))));
    }

    #[test]
    fn memory_store_overwrites() {
        let store = MemoryStore::new();
        store.set("k", "1").unwrap();
        store.set("k", "2").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("2"));
        assert_eq!(store.len(), 1);
    }
}
