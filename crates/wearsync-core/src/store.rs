//! Snapshot store: the phone's read-only view of the current forecast
//!
//! The store itself lives outside the sync subsystem. These implementations
//! are pass-throughs that can be read concurrently by any number of cycles.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{SyncError, SyncResult};
use crate::types::ForecastRow;

/// Source of the current forecast
pub trait SnapshotStore: Send + Sync {
    /// Current forecast, or `None` when the store has no data yet.
    fn query(&self) -> SyncResult<Option<ForecastRow>>;
}

/// In-memory store, shared by clone
#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    current: Arc<RwLock<Option<ForecastRow>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forecast(row: ForecastRow) -> Self {
        let store = Self::new();
        store.set(row);
        store
    }

    pub fn set(&self, row: ForecastRow) {
        *self.current.write() = Some(row);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn query(&self) -> SyncResult<Option<ForecastRow>> {
        Ok(*self.current.read())
    }
}

/// Reads a JSON-encoded [`ForecastRow`] from disk on every query.
///
/// A missing file means "no data yet". The file is rewritten by whatever
/// fetches forecasts; we never write it.
#[derive(Debug, Clone)]
pub struct JsonFileSnapshotStore {
    path: PathBuf,
}

impl JsonFileSnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonFileSnapshotStore {
    fn query(&self) -> SyncResult<Option<ForecastRow>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| SyncError::Store(format!("{}: {}", self.path.display(), e)))
    }
}
