use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode stored state: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: tempfile::PersistError,
    },
}

/// Persistent string key-value entries. Multi-key writes and removals are
/// applied as one unit.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError>;

    fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.entries.lock().clone()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        let mut map = self.entries.lock();
        for key in keys {
            map.remove(*key);
        }
        Ok(())
    }
}

/// Stores all entries as one JSON object, replaced atomically on every write.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileKeyValueStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(data_dir).map_err(|source| StorageError::Io {
            path: data_dir.to_path_buf(),
            source,
        })?;

        let path = data_dir.join("session.json");
        info!(file = %path.display(), exists = path.exists(), "opened session state file");

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_map(&self) -> Result<BTreeMap<String, String>, StorageError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(BTreeMap::new());
            }
            Err(source) => {
                return Err(StorageError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        if text.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        match serde_json::from_str::<BTreeMap<String, String>>(&text) {
            Ok(map) => Ok(map),
            Err(error) => {
                warn!(file = %self.path.display(), %error, "session state file is corrupt; treating as empty");
                Ok(BTreeMap::new())
            }
        }
    }

    fn save_map_atomic(&self, map: &BTreeMap<String, String>) -> Result<(), StorageError> {
        debug!(file = %self.path.display(), keys = map.len(), "saving session state atomically");

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let io_err = |source| StorageError::Io {
            path: self.path.clone(),
            source,
        };

        let mut temp = NamedTempFile::new_in(dir).map_err(io_err)?;
        let serialized = serde_json::to_string_pretty(map)?;
        temp.write_all(serialized.as_bytes()).map_err(io_err)?;
        temp.flush().map_err(io_err)?;

        temp.persist(&self.path).map_err(|source| StorageError::Persist {
            path: self.path.clone(),
            source,
        })?;
        Ok(())
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.load_map()?.remove(key))
    }

    #[tracing::instrument(skip(self, entries), fields(count = entries.len()))]
    fn set_many(&self, entries: &[(&str, String)]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_map()?;
        for (key, value) in entries {
            map.insert((*key).to_string(), value.clone());
        }
        self.save_map_atomic(&map)
    }

    #[tracing::instrument(skip(self))]
    fn remove_many(&self, keys: &[&str]) -> Result<(), StorageError> {
        let _guard = self.write_lock.lock();
        let mut map = self.load_map()?;
        let before = map.len();
        for key in keys {
            map.remove(*key);
        }
        if map.len() == before && !self.path.exists() {
            return Ok(());
        }
        self.save_map_atomic(&map)
    }
}
