//! Durable client-side storage.
//!
//! Session tokens, per-table cart caches, and in-flight checkout attempt
//! records must survive a process restart, so they live behind the
//! [`Storage`] trait: a flat key-value store of JSON strings with
//! namespaced keys (`"session"`, `"cart:fc_1:t_4"`,
//! `"checkout:attempt:<id>"`).
//!
//! [`FileStorage`] is the production implementation: one JSON document on
//! disk, rewritten atomically (write-temp-then-rename) on every change.
//! The data is a handful of small records per device, so whole-document
//! writes are cheaper than they sound. [`MemoryStorage`] backs tests and
//! ephemeral shells.

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use thiserror::Error;

/// Errors from durable client storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored document could not be encoded or decoded.
    #[error("storage serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Flat key-value persistence for client state.
///
/// Implementations must be safe to share across tasks. Values are opaque
/// strings; callers serialize their own records (JSON throughout this
/// crate).
pub trait Storage: Send + Sync + 'static {
    /// Read the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn load(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns an error if the write does not reach durable storage. The
    /// caller decides whether that is fatal; for session and cart caches
    /// it is not (the in-memory copy stays authoritative).
    fn store(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the removal cannot be persisted.
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

// =============================================================================
// FileStorage
// =============================================================================

const STORE_FILE: &str = "state.json";
const STORE_TMP_FILE: &str = "state.json.tmp";

/// File-backed storage: one JSON document, atomically replaced on write.
pub struct FileStorage {
    dir: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or create) the store under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing
    /// store file cannot be read or parsed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let path = dir.join(STORE_FILE);
        let entries = if path.exists() {
            serde_json::from_str(&fs::read_to_string(&path)?)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            dir,
            entries: Mutex::new(entries),
        })
    }

    fn path(&self) -> PathBuf {
        self.dir.join(STORE_FILE)
    }

    /// Write the whole document to a temp file, then rename over the live
    /// one so a crash mid-write never corrupts the store.
    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let tmp = self.dir.join(STORE_TMP_FILE);
        fs::write(&tmp, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&tmp, self.path())?;
        Ok(())
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Storage for FileStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries();
        entries.insert(key.to_owned(), value.to_owned());
        self.flush(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries();
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

impl std::fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStorage")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// MemoryStorage
// =============================================================================

/// In-memory storage for tests and ephemeral sessions.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Storage for MemoryStorage {
    fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries().get(key).cloned())
    }

    fn store(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
