//! Task errors
//!
//! `StoreIo` and `Checkpoint` are fatal: the task can no longer vouch for the
//! durability of its state and must be torn down. Everything else is a
//! contract violation or a collaborator failure surfaced to the caller.

use statestore::StoreError;
use thiserror::Error;

use crate::changelog::ChangelogError;
use crate::domain::{PartitionKey, TaskId};
use crate::state::CheckpointError;
use crate::task::TaskState;

/// Errors from task and state-manager operations
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("State directory for task {task_id} is held by another owner")]
    ResourceUnavailable { task_id: TaskId },

    #[error("Task {task_id} does not own partition {partition}")]
    InvalidPartition { task_id: TaskId, partition: PartitionKey },

    #[error("Offset limit {limit} for {partition} is below {floor}")]
    InvalidLimit {
        partition: PartitionKey,
        limit: i64,
        floor: i64,
    },

    #[error("Checkpoint offset {offset} for {partition} is below the previous checkpoint {checkpointed}")]
    CheckpointRegression {
        partition: PartitionKey,
        offset: i64,
        checkpointed: i64,
    },

    #[error("Task {task_id} must flush before checkpointing")]
    CheckpointBeforeFlush { task_id: TaskId },

    #[error("Store I/O error: {0}")]
    StoreIo(#[from] StoreError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("Changelog error: {0}")]
    Changelog(#[from] ChangelogError),

    #[error("Task {task_id} cannot {operation} while {state}")]
    IllegalState {
        task_id: TaskId,
        state: TaskState,
        operation: &'static str,
    },

    #[error("Task {task_id} failed earlier and must be closed")]
    TaskFailed { task_id: TaskId },

    #[error("Topology error in task {task_id}: {message}")]
    Topology { task_id: TaskId, message: String },
}

impl TaskError {
    /// Whether the task must be torn down after this error
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StoreIo(_) | Self::Checkpoint(_))
    }
}

/// Result of task operations
pub type TaskResult<T> = Result<T, TaskError>;
