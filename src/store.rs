//! Crash-safe JSON store for the identity and phase tables
//!
//! Writes go to a temporary file in the same directory followed by an atomic
//! rename, so a concurrently-running second invocation never observes a
//! half-written file. Reads of a missing or corrupt file start from empty:
//! durability is best-effort, correctness of a single run never depends on
//! historical state.

use crate::errors::EngineError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const MAX_WRITE_ATTEMPTS: u32 = 5;
const INITIAL_RETRY_DELAY_MS: u64 = 100;

/// Handle to one JSON-backed table, injected into components at
/// construction time.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the table, treating a missing or unreadable file as empty.
    pub fn load<V: DeserializeOwned>(&self) -> HashMap<String, V> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("[Store] {:?} not found, starting empty", self.path);
                return HashMap::new();
            }
            Err(e) => {
                warn!("[Store] failed to read {:?}: {}, starting empty", self.path, e);
                return HashMap::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    "[Store] corrupted store at {:?}: {}, starting empty",
                    self.path, e
                );
                HashMap::new()
            }
        }
    }

    /// Persist the full table atomically, retrying with backoff. A table
    /// that fails to serialize is fatal up front; writing an empty table in
    /// its place would clobber healthy committed state.
    pub fn save<V: Serialize>(&self, table: &HashMap<String, V>) -> Result<(), EngineError> {
        let body =
            serde_json::to_string_pretty(table).map_err(|e| EngineError::StoreUnwritable {
                path: self.path.clone(),
                attempts: 0,
                source: std::io::Error::other(e),
            })?;

        let mut delay_ms = INITIAL_RETRY_DELAY_MS;
        let mut last_err: Option<std::io::Error> = None;

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match self.write_atomic(&body) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    debug!(
                        "[Store] write attempt {}/{} for {:?} failed: {}",
                        attempt, MAX_WRITE_ATTEMPTS, self.path, e
                    );
                    last_err = Some(e);
                    if attempt < MAX_WRITE_ATTEMPTS {
                        std::thread::sleep(Duration::from_millis(delay_ms));
                        delay_ms *= 2;
                    }
                }
            }
        }

        Err(EngineError::StoreUnwritable {
            path: self.path.clone(),
            attempts: MAX_WRITE_ATTEMPTS,
            source: last_err
                .unwrap_or_else(|| std::io::Error::other("unknown write failure")),
        })
    }

    fn write_atomic(&self, body: &str) -> std::io::Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;

        // Temp file lands in the target directory so the rename stays on one
        // filesystem and is atomic.
        let tmp = dir.join(format!(
            ".tmp_{}.json",
            uuid::Uuid::new_v4().simple()
        ));
        fs::write(&tmp, body)?;
        match fs::rename(&tmp, &self.path) {
            Ok(()) => Ok(()),
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("nothing.json"));
        let table: HashMap<String, String> = store.load();
        assert!(table.is_empty());
    }

    #[test]
    fn test_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("table.json"));

        let mut table = HashMap::new();
        table.insert("alpha".to_string(), 1u32);
        table.insert("beta".to_string(), 2u32);
        store.save(&table).unwrap();

        let loaded: HashMap<String, u32> = store.load();
        assert_eq!(loaded, table);
    }

    #[test]
    fn test_corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.json");
        fs::write(&path, "{not json at all").unwrap();

        let store = JsonStore::new(&path);
        let table: HashMap<String, u32> = store.load();
        assert!(table.is_empty());
    }

    #[test]
    fn test_unwritable_store_is_fatal_after_retries() {
        // A regular file where the parent directory should be makes every
        // write attempt fail, regardless of the uid running the tests
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let path = blocker.join("table.json");
        let store = JsonStore::new(&path);
        let mut table = HashMap::new();
        table.insert("k".to_string(), 1u32);

        let err = store.save(&table).unwrap_err();
        match err {
            EngineError::StoreUnwritable {
                path: reported,
                attempts,
                ..
            } => {
                assert_eq!(reported, path);
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unserializable_table_never_writes_empty() {
        struct Broken;

        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("always fails"))
            }
        }

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("table.json");
        let store = JsonStore::new(&path);

        let mut table = HashMap::new();
        table.insert("k".to_string(), Broken);

        let err = store.save(&table).unwrap_err();
        assert!(matches!(err, EngineError::StoreUnwritable { attempts: 0, .. }));
        // Nothing was written, let alone an empty table
        assert!(!path.exists());
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let store = JsonStore::new(dir.path().join("table.json"));
        let mut table = HashMap::new();
        table.insert("k".to_string(), 1u32);
        store.save(&table).unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp_"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
