//! Store providers
//!
//! A task opens one store per owned change-log partition, inside its locked
//! task directory. The provider decides which engine backs it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use statestore::{MemoryStore, SqliteStore, StateStore, StoreError};
use tracing::debug;

use crate::domain::PartitionKey;

/// Opens the store backing one change-log partition
pub trait StoreProvider: Send + Sync {
    fn open(&self, task_dir: &Path, partition: &PartitionKey) -> Result<Box<dyn StateStore>, StoreError>;
}

/// SQLite file per partition: `{task_dir}/{source}-{partition}.sqlite3`
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProvider;

impl SqliteProvider {
    /// Path of the store file for a partition
    ///
    /// Stays inside `task_dir` only for keys that pass `PartitionKey::validate`.
    pub fn store_path(task_dir: &Path, partition: &PartitionKey) -> PathBuf {
        task_dir.join(format!("{}.sqlite3", partition))
    }
}

impl StoreProvider for SqliteProvider {
    fn open(&self, task_dir: &Path, partition: &PartitionKey) -> Result<Box<dyn StateStore>, StoreError> {
        debug!(task_dir = %task_dir.display(), %partition, "SqliteProvider::open: called");
        partition.validate().map_err(|reason| StoreError::Rejected {
            name: partition.to_string(),
            reason,
        })?;
        Ok(Box::new(SqliteStore::open(Self::store_path(task_dir, partition))?))
    }
}

/// Shared in-memory stores that outlive the tasks that open them
///
/// Reopening a store for the same task directory and partition returns the
/// same backing maps with unflushed writes discarded, the way a process
/// restart treats an on-disk store.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    stores: Mutex<BTreeMap<(PathBuf, PartitionKey), MemoryStore>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on a store previously opened through this provider
    pub fn store(&self, task_dir: &Path, partition: &PartitionKey) -> Option<MemoryStore> {
        let stores = self.stores.lock().ok()?;
        stores.get(&(task_dir.to_path_buf(), partition.clone())).cloned()
    }
}

impl StoreProvider for MemoryProvider {
    fn open(&self, task_dir: &Path, partition: &PartitionKey) -> Result<Box<dyn StateStore>, StoreError> {
        debug!(task_dir = %task_dir.display(), %partition, "MemoryProvider::open: called");
        let mut stores = self.stores.lock().map_err(|_| StoreError::Poisoned {
            name: partition.to_string(),
        })?;
        let key = (task_dir.to_path_buf(), partition.clone());
        let store = match stores.get(&key) {
            Some(existing) => {
                existing.reopen()?;
                existing.clone()
            }
            None => {
                let created = MemoryStore::new(partition.to_string());
                stores.insert(key, created.clone());
                created
            }
        };
        Ok(Box::new(store))
    }
}
