//! Namespaced key-value stores.
//!
//! Every call opens the namespace, performs one read or write and releases
//! it again; nothing is cached between calls.

use crate::error::{StorageError, StorageResult};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, trace};

/// String-valued preference storage grouped by namespace.
pub trait KeyValueStore: Send + Sync {
    /// Read a value. Missing keys are `Ok(None)`.
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<String>>;

    fn set(&self, namespace: &str, key: &str, value: &str) -> StorageResult<()>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, namespace: &str, key: &str) -> StorageResult<()>;

    /// Remove every key in a namespace.
    fn clear(&self, namespace: &str) -> StorageResult<()>;
}

fn validate_namespace(namespace: &str) -> StorageResult<()> {
    let valid = !namespace.is_empty()
        && namespace
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidNamespace(namespace.to_string()))
    }
}

/// Volatile store, used by tests and hosts without a writable disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, BTreeMap<String, String>>) -> R,
    ) -> StorageResult<R> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Internal("memory store lock poisoned".into()))?;
        Ok(f(&mut entries))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<String>> {
        validate_namespace(namespace)?;
        self.with_entries(|entries| {
            entries
                .get(namespace)
                .and_then(|values| values.get(key))
                .cloned()
        })
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> StorageResult<()> {
        validate_namespace(namespace)?;
        self.with_entries(|entries| {
            entries
                .entry(namespace.to_string())
                .or_default()
                .insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, namespace: &str, key: &str) -> StorageResult<()> {
        validate_namespace(namespace)?;
        self.with_entries(|entries| {
            if let Some(values) = entries.get_mut(namespace) {
                values.remove(key);
            }
        })
    }

    fn clear(&self, namespace: &str) -> StorageResult<()> {
        validate_namespace(namespace)?;
        self.with_entries(|entries| {
            entries.remove(namespace);
        })
    }
}

/// Store that keeps one JSON object per namespace in `<dir>/<namespace>.json`.
///
/// Writes go to a temporary file that is renamed over the original, so a
/// crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    dir: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> StorageResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "Opened preference store");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, namespace: &str) -> StorageResult<PathBuf> {
        validate_namespace(namespace)?;
        Ok(self.dir.join(format!("{namespace}.json")))
    }

    fn load(&self, namespace: &str) -> StorageResult<BTreeMap<String, String>> {
        let path = self.path_for(namespace)?;
        match fs::read_to_string(&path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, namespace: &str, values: &BTreeMap<String, String>) -> StorageResult<()> {
        let path = self.path_for(namespace)?;
        if values.is_empty() {
            return match fs::remove_file(&path) {
                Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(values)?)?;
        fs::rename(&tmp, &path)?;
        trace!(namespace, keys = values.len(), "Saved namespace");
        Ok(())
    }

    fn modify(
        &self,
        namespace: &str,
        f: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> StorageResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| StorageError::Internal("file store lock poisoned".into()))?;
        let mut values = self.load(namespace)?;
        f(&mut values);
        self.save(namespace, &values)
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, namespace: &str, key: &str) -> StorageResult<Option<String>> {
        Ok(self.load(namespace)?.remove(key))
    }

    fn set(&self, namespace: &str, key: &str, value: &str) -> StorageResult<()> {
        self.modify(namespace, |values| {
            values.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, namespace: &str, key: &str) -> StorageResult<()> {
        self.modify(namespace, |values| {
            values.remove(key);
        })
    }

    fn clear(&self, namespace: &str) -> StorageResult<()> {
        self.modify(namespace, BTreeMap::clear)
    }
}
