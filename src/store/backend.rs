use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::NamedTempFile;

use crate::error::StoreError;

/// Durable key-value text storage the state store persists into.
///
/// A backend only moves whole values; it knows nothing about their contents.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    /// Removing a key that does not exist is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }
}

/// Process-local backend. Contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// Directory-backed store: each key lives in `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| StoreError::Write {
            key: dir.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Read {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let write_err = |e: std::io::Error| StoreError::Write {
            key: key.to_string(),
            reason: e.to_string(),
        };
        // Unique staging file per write; the last persist wins.
        let mut staging = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
        staging.write_all(value.as_bytes()).map_err(write_err)?;
        staging.flush().map_err(write_err)?;
        staging.as_file().sync_all().map_err(write_err)?;
        staging
            .persist(self.path_for(key))
            .map(|_| ())
            .map_err(|e| write_err(e.error))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Write {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_store_round_trips_and_removes() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", "[1]").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("[1]"));
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn file_store_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let first = FileStore::open(dir.path().join("states")).unwrap();
        first.set("scenario-planner.calculator-states", "[]").unwrap();

        let second = FileStore::open(dir.path().join("states")).unwrap();
        assert_eq!(
            second
                .get("scenario-planner.calculator-states")
                .unwrap()
                .as_deref(),
            Some("[]")
        );
        assert!(
            dir.path()
                .join("states/scenario-planner.calculator-states.json")
                .exists()
        );
    }

    #[test]
    fn concurrent_file_handles_never_fail_a_write() {
        let dir = tempfile::tempdir().unwrap();
        let writers: Vec<_> = (0..4)
            .map(|writer| {
                let path = dir.path().to_path_buf();
                std::thread::spawn(move || {
                    let store = FileStore::open(path).unwrap();
                    (0..300)
                        .filter(|round| store.set("k", &format!("[{writer},{round}]")).is_err())
                        .count()
                })
            })
            .collect();
        let failures: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();
        assert_eq!(failures, 0);

        let store = FileStore::open(dir.path()).unwrap();
        let last: serde_json::Value =
            serde_json::from_str(&store.get("k").unwrap().unwrap()).unwrap();
        assert_eq!(last.as_array().map(Vec::len), Some(2));
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn file_store_sanitizes_keys_and_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("../escape/attempt", "x").unwrap();
        assert!(dir.path().join(".._escape_attempt.json").exists());
        assert_eq!(store.get("absent").unwrap(), None);
        store.remove("absent").unwrap();
    }
}
