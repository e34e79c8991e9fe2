//! Session-scoped submission persistence.
//!
//! [`SubmissionStore`] maps a [`SubmissionId`] to the JSON projection of its
//! [`SubmissionRecord`]. Writes are synchronous write-through: when `put`
//! returns, the next `get` sees the new value.
//!
//! * [`MemoryStore`] lives as long as the process (the default session).
//! * [`DirStore`] keeps one `submission_<id>.json` file per record in a
//!   session directory so a restarted process can pick runs back up.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;

use super::record::{SubmissionId, SubmissionRecord};

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Failures of the backing storage. A missing key is not an error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("stored submission could not be (de)serialised: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// SubmissionStore trait
// ---------------------------------------------------------------------------

/// Key/value persistence for submission projections.
///
/// Implementations must be `Send + Sync` so one store can be shared between
/// the orchestrator (the only writer) and any number of readers.
pub trait SubmissionStore: Send + Sync {
    /// Overwrite the entry for `id` with the full `record`.
    fn put(&self, id: &SubmissionId, record: &SubmissionRecord) -> Result<(), StoreError>;

    /// The stored projection, or `Ok(None)` when `id` is unknown.
    fn get(&self, id: &SubmissionId) -> Result<Option<SubmissionRecord>, StoreError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-process store holding serialised JSON, like a browser session store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<SubmissionId, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<SubmissionId, String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl SubmissionStore for MemoryStore {
    fn put(&self, id: &SubmissionId, record: &SubmissionRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        self.lock().insert(*id, json);
        Ok(())
    }

    fn get(&self, id: &SubmissionId) -> Result<Option<SubmissionRecord>, StoreError> {
        let json = self.lock().get(id).cloned();
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// DirStore
// ---------------------------------------------------------------------------

/// One JSON file per submission inside a session directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    /// Open (and create if needed) the session directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| StoreError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, id: &SubmissionId) -> PathBuf {
        self.dir.join(format!("submission_{id}.json"))
    }
}

impl SubmissionStore for DirStore {
    fn put(&self, id: &SubmissionId, record: &SubmissionRecord) -> Result<(), StoreError> {
        let path = self.entry_path(id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;

        // Write then rename so readers never observe a half-written entry.
        fs::write(&tmp, json).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        log::debug!("store: wrote {}", path.display());
        Ok(())
    }

    fn get(&self, id: &SubmissionId) -> Result<Option<SubmissionRecord>, StoreError> {
        let path = self.entry_path(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
