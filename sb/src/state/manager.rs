//! StateManager - owns a task's stores, offsets and checkpoint
//!
//! Single point of truth for bounded replay and checkpoint durability. It
//! holds the directory lock for as long as it lives, so dropping it on any
//! path (close, error, panic unwind) releases the task directory.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use statestore::{DirectoryLock, StateDirectory, StateStore, StoreError};
use tracing::{debug, info, warn};

use super::checkpoint::CheckpointFile;
use super::provider::StoreProvider;
use crate::domain::{ChangelogRecord, OffsetLimit, OffsetMap, PartitionKey, StateWrite, TaskId, UNBOUNDED};
use crate::error::{TaskError, TaskResult};

/// Owner of one task's local state
pub struct StateManager {
    task_id: TaskId,
    task_dir: PathBuf,
    lock: Option<DirectoryLock>,
    stores: BTreeMap<PartitionKey, Box<dyn StateStore>>,
    checkpoint_file: CheckpointFile,
    /// Last durable checkpoint
    checkpointed: OffsetMap,
    /// Last applied offset per partition, including uncommitted progress
    applied: OffsetMap,
    limits: OffsetLimit,
    /// Ceiling for partitions missing from `limits`
    default_limit: i64,
    /// Writes applied since the last successful flush
    unflushed: bool,
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("task_id", &self.task_id)
            .field("task_dir", &self.task_dir)
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .field("checkpointed", &self.checkpointed)
            .field("applied", &self.applied)
            .field("limits", &self.limits)
            .field("default_limit", &self.default_limit)
            .field("unflushed", &self.unflushed)
            .finish()
    }
}

impl StateManager {
    /// Lock the task directory, open one store per partition and load the checkpoint
    pub fn open(
        task_id: TaskId,
        partitions: &BTreeSet<PartitionKey>,
        state_dir: &StateDirectory,
        provider: &dyn StoreProvider,
    ) -> TaskResult<Self> {
        debug!(%task_id, partitions = partitions.len(), "StateManager::open: called");
        let lock = state_dir.lock(&task_id.to_string()).map_err(|e| match e {
            StoreError::Locked { .. } => TaskError::ResourceUnavailable { task_id },
            other => TaskError::StoreIo(other),
        })?;
        let task_dir = lock.dir().to_path_buf();

        let mut stores = BTreeMap::new();
        for partition in partitions {
            let store = provider.open(&task_dir, partition)?;
            stores.insert(partition.clone(), store);
        }

        let checkpoint_file = CheckpointFile::new(&task_dir);
        checkpoint_file.sweep_temp_files();
        let mut checkpointed = checkpoint_file.read()?.unwrap_or_default();
        checkpointed.retain(|partition, offset| {
            let owned = partitions.contains(partition);
            if !owned {
                warn!(%task_id, %partition, offset = *offset, "Ignoring checkpoint entry for unowned partition");
            }
            owned
        });

        info!(%task_id, dir = %task_dir.display(), checkpointed = ?checkpointed, "Opened task state");
        Ok(Self {
            task_id,
            task_dir,
            lock: Some(lock),
            stores,
            checkpoint_file,
            applied: checkpointed.clone(),
            checkpointed,
            limits: OffsetLimit::new(),
            default_limit: UNBOUNDED,
            unflushed: false,
        })
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// The locked task directory
    pub fn task_dir(&self) -> &Path {
        &self.task_dir
    }

    /// Apply records in order while `offset < limit`; return the rest untouched
    ///
    /// Records at or below the last applied offset are consumed without being
    /// written again. Every record must belong to `partition`; this is checked
    /// before anything is applied.
    pub fn apply_bounded(
        &mut self,
        partition: &PartitionKey,
        mut records: Vec<ChangelogRecord>,
    ) -> TaskResult<Vec<ChangelogRecord>> {
        debug!(task_id = %self.task_id, %partition, count = records.len(), "StateManager::apply_bounded: called");
        let task_id = self.task_id;
        let limit = self.limit(partition);
        let store = self.stores.get_mut(partition).ok_or_else(|| TaskError::InvalidPartition {
            task_id,
            partition: partition.clone(),
        })?;
        if let Some(stray) = records.iter().find(|r| r.partition != *partition) {
            return Err(TaskError::InvalidPartition {
                task_id,
                partition: stray.partition.clone(),
            });
        }

        let mut last = self.applied.get(partition).copied();
        let mut consumed = 0usize;
        let mut written = 0usize;
        for record in &records {
            if record.offset >= limit {
                break;
            }
            consumed += 1;
            if last.is_some_and(|l| record.offset <= l) {
                continue;
            }
            let result = match &record.value {
                Some(value) => store.put(&record.key, value),
                None => store.delete(&record.key),
            };
            if let Err(e) = result {
                if let Some(l) = last {
                    self.applied.insert(partition.clone(), l);
                }
                self.unflushed |= written > 0;
                return Err(e.into());
            }
            last = Some(record.offset);
            written += 1;
        }

        if written > 0 {
            if let Some(l) = last {
                self.applied.insert(partition.clone(), l);
            }
            self.unflushed = true;
        }

        let remainder = records.split_off(consumed);
        debug!(
            task_id = %self.task_id,
            %partition,
            written,
            skipped = consumed - written,
            remainder = remainder.len(),
            limit,
            "StateManager::apply_bounded: done"
        );
        Ok(remainder)
    }

    /// Apply a topology write without moving any offset
    pub fn apply_write(&mut self, write: &StateWrite) -> TaskResult<()> {
        let task_id = self.task_id;
        let store = self
            .stores
            .get_mut(&write.partition)
            .ok_or_else(|| TaskError::InvalidPartition {
                task_id,
                partition: write.partition.clone(),
            })?;
        match &write.value {
            Some(value) => store.put(&write.key, value)?,
            None => store.delete(&write.key)?,
        }
        self.unflushed = true;
        Ok(())
    }

    /// Force every store's buffered writes to durable storage
    pub fn flush(&mut self) -> TaskResult<()> {
        debug!(task_id = %self.task_id, "StateManager::flush: called");
        for store in self.stores.values_mut() {
            store.flush()?;
        }
        self.unflushed = false;
        Ok(())
    }

    /// Persist applied offsets merged with `overrides` (overrides win)
    ///
    /// Must follow a successful `flush` covering everything applied so far.
    pub fn checkpoint(&mut self, overrides: &OffsetMap) -> TaskResult<()> {
        debug!(task_id = %self.task_id, overrides = overrides.len(), "StateManager::checkpoint: called");
        if self.unflushed {
            return Err(TaskError::CheckpointBeforeFlush { task_id: self.task_id });
        }

        let mut merged = self.applied.clone();
        for (partition, offset) in overrides {
            if !self.stores.contains_key(partition) {
                return Err(TaskError::InvalidPartition {
                    task_id: self.task_id,
                    partition: partition.clone(),
                });
            }
            merged.insert(partition.clone(), *offset);
        }
        for (partition, offset) in &merged {
            if let Some(previous) = self.checkpointed.get(partition)
                && offset < previous
            {
                return Err(TaskError::CheckpointRegression {
                    partition: partition.clone(),
                    offset: *offset,
                    checkpointed: *previous,
                });
            }
        }

        if merged == self.checkpointed && self.checkpoint_file.exists() {
            debug!(task_id = %self.task_id, "StateManager::checkpoint: unchanged, skipping write");
            return Ok(());
        }

        self.checkpoint_file.write(&merged)?;
        for (partition, offset) in &merged {
            let applied = self.applied.entry(partition.clone()).or_insert(*offset);
            *applied = (*applied).max(*offset);
        }
        self.checkpointed = merged;
        Ok(())
    }

    /// Last durable checkpoint
    pub fn checkpointed(&self) -> &OffsetMap {
        &self.checkpointed
    }

    /// Last applied offset per partition, including uncommitted progress
    pub fn applied(&self) -> &OffsetMap {
        &self.applied
    }

    /// Ceiling currently in effect for a partition
    pub fn limit(&self, partition: &PartitionKey) -> i64 {
        self.limits.get(partition).copied().unwrap_or(self.default_limit)
    }

    /// Set the ceiling for partitions that have no entry in the limits
    ///
    /// Starts out `UNBOUNDED`, which suits an active task restoring its own
    /// change log. A standby sets `UNCOMMITTED`.
    pub fn set_default_limit(&mut self, limit: i64) {
        debug!(task_id = %self.task_id, limit, "StateManager::set_default_limit: called");
        self.default_limit = limit;
    }

    /// Replace the ceilings
    ///
    /// Rejects the whole update if any limit is below what was already
    /// checkpointed or applied for that partition.
    pub fn refresh_limits(&mut self, limits: OffsetLimit) -> TaskResult<()> {
        debug!(task_id = %self.task_id, limits = ?limits, "StateManager::refresh_limits: called");
        for (partition, limit) in &limits {
            if !self.stores.contains_key(partition) {
                return Err(TaskError::InvalidPartition {
                    task_id: self.task_id,
                    partition: partition.clone(),
                });
            }
            let floor = [self.checkpointed.get(partition), self.applied.get(partition)]
                .into_iter()
                .flatten()
                .copied()
                .max();
            if let Some(floor) = floor
                && *limit < floor
            {
                return Err(TaskError::InvalidLimit {
                    partition: partition.clone(),
                    limit: *limit,
                    floor,
                });
            }
        }
        self.limits = limits;
        Ok(())
    }

    /// Store backing a partition
    pub fn store(&self, partition: &PartitionKey) -> Option<&dyn StateStore> {
        self.stores.get(partition).map(|s| s.as_ref())
    }

    /// Close every store, then release the directory lock
    ///
    /// All stores are closed and the lock is released even if one of them
    /// fails; the first error is returned.
    pub fn close(mut self) -> TaskResult<()> {
        debug!(task_id = %self.task_id, "StateManager::close: called");
        let mut first_error: Option<TaskError> = None;
        for (partition, store) in self.stores.iter_mut() {
            if let Err(e) = store.close() {
                warn!(task_id = %self.task_id, %partition, error = %e, "Failed to close store");
                first_error.get_or_insert(e.into());
            }
        }
        if let Some(lock) = self.lock.take()
            && let Err(e) = lock.unlock()
        {
            first_error.get_or_insert(e.into());
        }
        info!(task_id = %self.task_id, "Closed task state");
        first_error.map_or(Ok(()), Err)
    }
}
