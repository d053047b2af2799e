//! ActiveTask - owner of a task's partition state that runs its topology
//!
//! Restores its stores from the change log without a ceiling, then feeds
//! input records through a `Topology` whose writes land in the same stores.

use std::collections::BTreeSet;
use std::sync::Arc;

use statestore::{StateDirectory, StateStore};
use tracing::{debug, error, info, warn};

use super::{Task, TaskState};
use crate::domain::{ChangelogRecord, CommittedOffsets, OffsetMap, PartitionKey, StateWrite, TaskId};
use crate::error::{TaskError, TaskResult};
use crate::state::{StateManager, StoreProvider};

/// User processing logic run by an active task
pub trait Topology: Send {
    /// Called once before the first record
    fn init(&mut self, task_id: TaskId) -> Result<(), String>;

    /// Process one input record into store writes
    fn process(&mut self, record: &ChangelogRecord) -> Result<Vec<StateWrite>, String>;

    /// Called once after the last record
    fn close(&mut self) -> Result<(), String>;
}

/// An active task bound to one task id, its partitions and its topology
pub struct ActiveTask {
    id: TaskId,
    partitions: BTreeSet<PartitionKey>,
    state_dir: StateDirectory,
    provider: Arc<dyn StoreProvider>,
    topology: Box<dyn Topology>,
    topology_running: bool,
    state: TaskState,
    manager: Option<StateManager>,
    /// Next offset to consume per input partition since the last drain
    consumed: OffsetMap,
    committed: CommittedOffsets,
    failed: bool,
}

impl std::fmt::Debug for ActiveTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveTask")
            .field("id", &self.id)
            .field("partitions", &self.partitions)
            .field("state", &self.state)
            .field("topology_running", &self.topology_running)
            .field("consumed", &self.consumed)
            .field("failed", &self.failed)
            .finish()
    }
}

impl ActiveTask {
    pub fn new(
        id: TaskId,
        partitions: BTreeSet<PartitionKey>,
        state_dir: StateDirectory,
        provider: Arc<dyn StoreProvider>,
        topology: Box<dyn Topology>,
    ) -> Self {
        debug!(task_id = %id, partitions = partitions.len(), "ActiveTask::new: called");
        Self {
            id,
            partitions,
            state_dir,
            provider,
            topology,
            topology_running: false,
            state: TaskState::Created,
            manager: None,
            consumed: OffsetMap::new(),
            committed: CommittedOffsets::default(),
            failed: false,
        }
    }

    /// Lock the task directory, open stores and load the checkpoint
    pub fn initialize(&mut self) -> TaskResult<()> {
        debug!(task_id = %self.id, "ActiveTask::initialize: called");
        if self.state != TaskState::Created {
            return Err(TaskError::IllegalState {
                task_id: self.id,
                state: self.state,
                operation: "initialize",
            });
        }

        let manager = StateManager::open(self.id, &self.partitions, &self.state_dir, self.provider.as_ref())?;
        self.committed = CommittedOffsets::from(manager.checkpointed().clone());
        self.manager = Some(manager);
        self.state = TaskState::Running;
        info!(task_id = %self.id, committed = ?self.committed, "Initialized active task");
        Ok(())
    }

    /// Start the topology; restoration should be complete
    pub fn init_topology(&mut self) -> TaskResult<()> {
        debug!(task_id = %self.id, "ActiveTask::init_topology: called");
        self.running_manager("init topology")?;
        if self.topology_running {
            return Err(TaskError::Topology {
                task_id: self.id,
                message: "topology already initialized".to_string(),
            });
        }
        self.topology.init(self.id).map_err(|message| TaskError::Topology {
            task_id: self.id,
            message,
        })?;
        self.topology_running = true;
        info!(task_id = %self.id, "Topology initialized");
        Ok(())
    }

    /// Run one input record through the topology; returns the number of writes applied
    pub fn process(&mut self, record: &ChangelogRecord) -> TaskResult<usize> {
        debug!(task_id = %self.id, partition = %record.partition, offset = record.offset, "ActiveTask::process: called");
        if !self.topology_running {
            return Err(TaskError::IllegalState {
                task_id: self.id,
                state: self.state,
                operation: "process before topology init",
            });
        }
        let task_id = self.id;
        let writes = self
            .topology
            .process(record)
            .map_err(|message| TaskError::Topology { task_id, message })?;

        let result = self.apply_writes(&writes);
        let count = self.track(result)?;
        self.consumed.insert(record.partition.clone(), record.offset + 1);
        Ok(count)
    }

    /// Stop the topology if it is running
    pub fn close_topology(&mut self) -> TaskResult<()> {
        debug!(task_id = %self.id, running = self.topology_running, "ActiveTask::close_topology: called");
        if !self.topology_running {
            return Ok(());
        }
        self.topology_running = false;
        self.topology.close().map_err(|message| TaskError::Topology {
            task_id: self.id,
            message,
        })
    }

    /// Drain next-offset-to-consume per input partition for the consumer group
    pub fn commit_offsets(&mut self) -> OffsetMap {
        std::mem::take(&mut self.consumed)
    }

    /// Snapshot of the last durable checkpoint
    pub fn committed_offsets(&self) -> CommittedOffsets {
        self.committed.clone()
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn store(&self, partition: &PartitionKey) -> Option<&dyn StateStore> {
        self.manager.as_ref()?.store(partition)
    }

    fn apply_writes(&mut self, writes: &[StateWrite]) -> TaskResult<usize> {
        let manager = self.running_manager("process")?;
        for write in writes {
            manager.apply_write(write)?;
        }
        Ok(writes.len())
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
            error!(task_id = %self.id, error = %e, "Active task failed; close it and reassign its partitions");
            self.failed = true;
        }
        result
    }

    fn commit_cycle(&mut self) -> TaskResult<()> {
        let manager = self.running_manager("commit")?;
        manager.flush()?;
        manager.checkpoint(&OffsetMap::new())?;
        self.committed = CommittedOffsets::from(manager.checkpointed().clone());
        Ok(())
    }
}

impl Task for ActiveTask {
    fn id(&self) -> TaskId {
        self.id
    }

    fn owned_partitions(&self) -> &BTreeSet<PartitionKey> {
        &self.partitions
    }

    /// Restore change-log records; active tasks have no ceiling
    fn update(&mut self, partition: &PartitionKey, records: Vec<ChangelogRecord>) -> TaskResult<Vec<ChangelogRecord>> {
        debug!(task_id = %self.id, %partition, count = records.len(), "ActiveTask::update: called");
        let result = self
            .running_manager("update")
            .and_then(|manager| manager.apply_bounded(partition, records));
        self.track(result)
    }

    fn commit(&mut self) -> TaskResult<()> {
        debug!(task_id = %self.id, "ActiveTask::commit: called");
        let result = self.commit_cycle();
        if result.is_ok() {
            info!(task_id = %self.id, committed = ?self.committed, "Committed active task");
        }
        self.track(result)
    }

    fn close(&mut self) -> TaskResult<()> {
        debug!(task_id = %self.id, state = %self.state, "ActiveTask::close: called");
        let topology_result = self.close_topology();
        if let Err(e) = &topology_result {
            warn!(task_id = %self.id, error = %e, "Topology failed to close");
        }
        self.state = TaskState::Closed;
        let state_result = match self.manager.take() {
            Some(manager) => manager.close(),
            None => Ok(()),
        };
        info!(task_id = %self.id, failed = self.failed, "Closed active task");
        state_result.and(topology_result)
    }
}
