//! standby - passive replicas of partitioned task state
//!
//! A standby task replays each owned partition's change log into local
//! stores, never past the ceiling the active task's consumer group has
//! committed, and checkpoints its progress so a restart resumes exactly
//! where the last durable commit left off.
//!
//! ```text
//! execution loop (StandbyDriver)
//!     |  poll                         | update / commit
//!     v                               v
//! ChangelogSource  ---ceiling--->  StandbyTask
//!                                     |
//!                                     v
//!                                 StateManager --> StateStore (per partition)
//!                                     |
//!                                     +--> .checkpoint, .lock in <state_dir>/<task_id>/
//! ```

pub mod changelog;
pub mod cli;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod state;
pub mod task;

pub use changelog::{ChangelogError, ChangelogSource, MemoryChangelog};
pub use config::Config;
pub use domain::{ChangelogRecord, CommittedOffsets, OffsetLimit, OffsetMap, PartitionKey, StateWrite, TaskId};
pub use driver::{DriverConfig, DriverStats, StandbyDriver};
pub use error::{TaskError, TaskResult};
pub use state::{CheckpointError, CheckpointFile, MemoryProvider, SqliteProvider, StateManager, StoreProvider};
pub use task::{ActiveTask, AssignedTask, StandbyTask, Task, TaskState, Topology};

/// Default driver commit cadence (30 seconds)
pub const DEFAULT_COMMIT_INTERVAL_MS: u64 = 30_000;

/// Default driver poll cadence
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Default records per partition per poll
pub const DEFAULT_MAX_POLL_RECORDS: usize = 500;
