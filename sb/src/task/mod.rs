//! Tasks: the units of assignment that own partition state
//!
//! `StandbyTask` replays change logs under a ceiling; `ActiveTask` restores
//! and then runs a topology. Both share the `Task` contract the execution
//! loop drives. Topology operations exist only on `ActiveTask`.

mod active;
mod standby;

use std::collections::BTreeSet;
use std::fmt;

use crate::domain::{ChangelogRecord, PartitionKey, TaskId};
use crate::error::TaskResult;

pub use active::{ActiveTask, Topology};
pub use standby::StandbyTask;

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Constructed; holds no resources yet
    Created,
    /// Initialized; holds the directory lock and open stores
    Running,
    /// Resources released
    Closed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Contract shared by every task role
pub trait Task {
    fn id(&self) -> TaskId;

    /// Change-log partitions assigned to the task
    fn owned_partitions(&self) -> &BTreeSet<PartitionKey>;

    /// Apply records for one partition; returns the records not consumed
    fn update(&mut self, partition: &PartitionKey, records: Vec<ChangelogRecord>) -> TaskResult<Vec<ChangelogRecord>>;

    /// Make applied state durable and checkpoint it
    fn commit(&mut self) -> TaskResult<()>;

    /// Release stores and the directory lock
    fn close(&mut self) -> TaskResult<()>;
}

/// A task in one of its two roles
pub enum AssignedTask {
    Active(ActiveTask),
    Standby(StandbyTask),
}

impl AssignedTask {
    pub fn is_standby(&self) -> bool {
        matches!(self, Self::Standby(_))
    }

    fn inner(&self) -> &dyn Task {
        match self {
            Self::Active(task) => task,
            Self::Standby(task) => task,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Task {
        match self {
            Self::Active(task) => task,
            Self::Standby(task) => task,
        }
    }
}

impl Task for AssignedTask {
    fn id(&self) -> TaskId {
        self.inner().id()
    }

    fn owned_partitions(&self) -> &BTreeSet<PartitionKey> {
        self.inner().owned_partitions()
    }

    fn update(&mut self, partition: &PartitionKey, records: Vec<ChangelogRecord>) -> TaskResult<Vec<ChangelogRecord>> {
        self.inner_mut().update(partition, records)
    }

    fn commit(&mut self) -> TaskResult<()> {
        self.inner_mut().commit()
    }

    fn close(&mut self) -> TaskResult<()> {
        self.inner_mut().close()
    }
}

impl From<ActiveTask> for AssignedTask {
    fn from(task: ActiveTask) -> Self {
        Self::Active(task)
    }
}

impl From<StandbyTask> for AssignedTask {
    fn from(task: StandbyTask) -> Self {
        Self::Standby(task)
    }
}
