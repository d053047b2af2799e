//! StandbyTask - passive replica of a task's partition state
//!
//! Replays change-log records into local stores without ever running ahead of
//! the ceiling reported by the change-log source, and checkpoints progress on
//! each commit so a restart resumes from the last durable offset.

use std::collections::BTreeSet;
use std::sync::Arc;

use statestore::{StateDirectory, StateStore};
use tracing::{debug, error, info};

use super::{Task, TaskState};
use crate::changelog::ChangelogSource;
use crate::domain::{ChangelogRecord, CommittedOffsets, OffsetMap, PartitionKey, TaskId, UNCOMMITTED};
use crate::error::{TaskError, TaskResult};
use crate::state::{StateManager, StoreProvider};

/// A standby replica bound to one task id and its assigned partitions
pub struct StandbyTask {
    id: TaskId,
    partitions: BTreeSet<PartitionKey>,
    state_dir: StateDirectory,
    provider: Arc<dyn StoreProvider>,
    source: Arc<dyn ChangelogSource>,
    state: TaskState,
    manager: Option<StateManager>,
    committed: CommittedOffsets,
    failed: bool,
}

impl std::fmt::Debug for StandbyTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandbyTask")
            .field("id", &self.id)
            .field("partitions", &self.partitions)
            .field("state", &self.state)
            .field("committed", &self.committed)
            .field("failed", &self.failed)
            .finish()
    }
}

impl StandbyTask {
    /// Create a task; nothing is opened until `initialize`
    pub fn new(
        id: TaskId,
        partitions: BTreeSet<PartitionKey>,
        state_dir: StateDirectory,
        provider: Arc<dyn StoreProvider>,
        source: Arc<dyn ChangelogSource>,
    ) -> Self {
        debug!(task_id = %id, partitions = partitions.len(), "StandbyTask::new: called");
        Self {
            id,
            partitions,
            state_dir,
            provider,
            source,
            state: TaskState::Created,
            manager: None,
            committed: CommittedOffsets::default(),
            failed: false,
        }
    }

    /// Lock the task directory, open stores, load the checkpoint and fetch ceilings
    ///
    /// A partition the source has no committed ceiling for gets `UNCOMMITTED`,
    /// so nothing is applied to it until the active side commits. On failure
    /// the task stays `Created` and holds nothing, so it may be retried.
    pub fn initialize(&mut self) -> TaskResult<()> {
        debug!(task_id = %self.id, "StandbyTask::initialize: called");
        if self.state != TaskState::Created {
            return Err(TaskError::IllegalState {
                task_id: self.id,
                state: self.state,
                operation: "initialize",
            });
        }

        let mut manager = StateManager::open(self.id, &self.partitions, &self.state_dir, self.provider.as_ref())?;
        manager.set_default_limit(UNCOMMITTED);
        let limits = self.source.committed_ceiling(&self.partitions)?;
        manager.refresh_limits(limits)?;

        self.committed = CommittedOffsets::from(manager.checkpointed().clone());
        self.manager = Some(manager);
        self.state = TaskState::Running;
        info!(task_id = %self.id, committed = ?self.committed, "Initialized standby task");
        Ok(())
    }

    /// Snapshot of the last durable checkpoint
    pub fn committed_offsets(&self) -> CommittedOffsets {
        self.committed.clone()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Whether a fatal error has poisoned the task
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Store backing a partition, while running
    pub fn store(&self, partition: &PartitionKey) -> Option<&dyn StateStore> {
        self.manager.as_ref()?.store(partition)
    }

    /// Ceiling in effect for a partition, while running
    pub fn offset_limit(&self, partition: &PartitionKey) -> Option<i64> {
        self.manager.as_ref().map(|m| m.limit(partition))
    }

    /// Last applied offsets including uncommitted progress, while running
    pub fn applied_offsets(&self) -> Option<&OffsetMap> {
        self.manager.as_ref().map(StateManager::applied)
    }

    fn running_manager(&mut self, operation: &'static str) -> TaskResult<&mut StateManager> {
        if self.failed {
            return Err(TaskError::TaskFailed { task_id: self.id });
        }
        match (self.state, self.manager.as_mut()) {
            (TaskState::Running, Some(manager)) => Ok(manager),
            (state, _) => Err(TaskError::IllegalState {
                task_id: self.id,
                state,
                operation,
            }),
        }
    }

    fn track<T>(&mut self, result: TaskResult<T>) -> TaskResult<T> {
        if let Err(e) = &result
            && e.is_fatal()
        {
            error!(task_id = %self.id, error = %e, "Standby task failed; close it and reassign its partitions");
            self.failed = true;
        }
        result
    }

    fn commit_cycle(&mut self) -> TaskResult<()> {
        let manager = self.running_manager("commit")?;
        manager.flush()?;
        manager.checkpoint(&OffsetMap::new())?;
        let snapshot = CommittedOffsets::from(manager.checkpointed().clone());
        self.committed = snapshot;

        let limits = self.source.committed_ceiling(&self.partitions)?;
        self.running_manager("commit")?.refresh_limits(limits)?;
        Ok(())
    }
}

impl Task for StandbyTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn owned_partitions(&self) -> &BTreeSet<PartitionKey> {
        &self.partitions
    }

    fn update(&mut self, partition: &PartitionKey, records: Vec<ChangelogRecord>) -> TaskResult<Vec<ChangelogRecord>> {
        debug!(task_id = %self.id, %partition, count = records.len(), "StandbyTask::update: called");
        let result = self
            .running_manager("update")
            .and_then(|manager| manager.apply_bounded(partition, records));
        self.track(result)
    }

    fn commit(&mut self) -> TaskResult<()> {
        debug!(task_id = %self.id, "StandbyTask::commit: called");
        let result = self.commit_cycle();
        if result.is_ok() {
            info!(task_id = %self.id, committed = ?self.committed, "Committed standby task");
        }
        self.track(result)
    }

    fn close(&mut self) -> TaskResult<()> {
        debug!(task_id = %self.id, state = %self.state, "StandbyTask::close: called");
        let previous = std::mem::replace(&mut self.state, TaskState::Closed);
        match self.manager.take() {
            Some(manager) => {
                let result = manager.close();
                info!(task_id = %self.id, failed = self.failed, "Closed standby task");
                result
            }
            None => {
                debug!(task_id = %self.id, %previous, "StandbyTask::close: nothing to release");
                Ok(())
            }
        }
    }
}
