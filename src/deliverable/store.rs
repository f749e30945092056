//! Deliverable registry.
//!
//! Records identifier, type and status of every deliverable a worker reports,
//! keyed by identifier. Records are immutable: recording the same identifier
//! again is accepted only if nothing about it changed.

use super::Deliverable;
use crate::errors::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A deliverable as held by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDeliverable {
    #[serde(flatten)]
    pub deliverable: Deliverable,
    /// Phase whose worker produced the deliverable
    pub phase: String,
    /// Attempt number within that phase
    pub attempt: u32,
    pub recorded_at: DateTime<Utc>,
}

impl StoredDeliverable {
    fn same_record(&self, deliverable: &Deliverable) -> bool {
        self.deliverable == *deliverable
    }
}

/// Storage for deliverable records. Implementations must be safe to share
/// across the two loops of a parallel pair.
pub trait DeliverableStore: Send + Sync {
    /// Record a deliverable; fails with `Conflict` if the identifier already
    /// exists with a different type or status.
    fn record(&self, phase: &str, attempt: u32, deliverable: &Deliverable)
    -> Result<(), StoreError>;

    fn lookup(&self, id: &str) -> Result<Option<StoredDeliverable>, StoreError>;
}

/// In-memory registry, used for tests and dry runs.
#[derive(Default)]
pub struct MemoryDeliverableStore {
    records: Mutex<HashMap<String, StoredDeliverable>>,
}

impl MemoryDeliverableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeliverableStore for MemoryDeliverableStore {
    fn record(
        &self,
        phase: &str,
        attempt: u32,
        deliverable: &Deliverable,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(existing) = records.get(&deliverable.id) {
            if existing.same_record(deliverable) {
                return Ok(());
            }
            return Err(StoreError::Conflict {
                id: deliverable.id.clone(),
            });
        }
        records.insert(
            deliverable.id.clone(),
            StoredDeliverable {
                deliverable: deliverable.clone(),
                phase: phase.to_string(),
                attempt,
                recorded_at: Utc::now(),
            },
        );
        Ok(())
    }

    fn lookup(&self, id: &str) -> Result<Option<StoredDeliverable>, StoreError> {
        let records = self.records.lock().map_err(|_| StoreError::LockPoisoned)?;
        Ok(records.get(id).cloned())
    }
}

/// File-backed registry: one JSON record per identifier under a directory.
pub struct FsDeliverableStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FsDeliverableStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    /// Identifiers are opaque, so the file name is derived from their hash.
    fn record_path(&self, id: &str) -> PathBuf {
        let key = super::ContentId::of(id.as_bytes());
        let key = key.trim_start_matches("sha256:");
        self.dir.join(format!("{}.json", &key[..32]))
    }

    fn read_record(&self, path: &Path) -> Result<Option<StoredDeliverable>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

impl DeliverableStore for FsDeliverableStore {
    fn record(
        &self,
        phase: &str,
        attempt: u32,
        deliverable: &Deliverable,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::LockPoisoned)?;
        let path = self.record_path(&deliverable.id);

        if let Some(existing) = self.read_record(&path)? {
            if existing.same_record(deliverable) {
                return Ok(());
            }
            return Err(StoreError::Conflict {
                id: deliverable.id.clone(),
            });
        }

        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let record = StoredDeliverable {
            deliverable: deliverable.clone(),
            phase: phase.to_string(),
            attempt,
            recorded_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&record)?;
        std::fs::write(&path, json).map_err(|source| StoreError::Io { path, source })
    }

    fn lookup(&self, id: &str) -> Result<Option<StoredDeliverable>, StoreError> {
        self.read_record(&self.record_path(id))
    }
}
