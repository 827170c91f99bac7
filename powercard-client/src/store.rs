//! Key-value stores backing the reversal queue

use powercard_core::{PowerCardError, PowerCardResult};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Durable string key-value storage
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> PowerCardResult<Option<String>>;

    /// Replace the value under `key` atomically
    fn put(&self, key: &str, value: &str) -> PowerCardResult<()>;

    /// Delete `key`; deleting a missing key is not an error
    fn remove(&self, key: &str) -> PowerCardResult<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> PowerCardResult<Option<String>> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &str) -> PowerCardResult<()> {
        (**self).put(key, value)
    }

    fn remove(&self, key: &str) -> PowerCardResult<()> {
        (**self).remove(key)
    }
}

/// Volatile store, for tests and terminals without storage
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> PowerCardResult<Option<String>> {
        Ok(self.entries().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> PowerCardResult<()> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> PowerCardResult<()> {
        self.entries().remove(key);
        Ok(())
    }
}

/// One file per key inside a directory
///
/// Writes go to a temporary file that is synced and then renamed over the
/// old value, so a crash leaves either the old or the new value.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`
    pub fn open<P: AsRef<Path>>(dir: P) -> PowerCardResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            PowerCardError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PowerCardResult<PathBuf> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(PowerCardError::Storage(format!("Invalid store key {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> PowerCardResult<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PowerCardError::Storage(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn put(&self, key: &str, value: &str) -> PowerCardResult<()> {
        let path = self.path_for(key)?;
        let tmp = path.with_extension("json.tmp");
        let storage_err = |e: std::io::Error| {
            PowerCardError::Storage(format!("Failed to write {}: {}", path.display(), e))
        };

        let mut file = std::fs::File::create(&tmp).map_err(storage_err)?;
        file.write_all(value.as_bytes()).map_err(storage_err)?;
        file.sync_all().map_err(storage_err)?;
        drop(file);
        std::fs::rename(&tmp, &path).map_err(storage_err)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> PowerCardResult<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PowerCardError::Storage(format!(
                "Failed to remove {}: {}",
                path.display(),
                e
            ))),
        }
    }
}
