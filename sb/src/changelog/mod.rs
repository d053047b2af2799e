//! Change-log sources
//!
//! A `ChangelogSource` supplies ordered records per partition and reports the
//! ceiling a standby may replay up to: the active task's consumer-group
//! committed progress. The core only reads from it.

mod memory;

use std::collections::BTreeSet;

use thiserror::Error;

use crate::domain::{ChangelogRecord, OffsetLimit, PartitionKey};

pub use memory::{ChangelogLine, MemoryChangelog};

/// Errors from change-log sources
#[derive(Debug, Error)]
pub enum ChangelogError {
    #[error("Record offset {offset} for {partition} does not follow offset {last}")]
    OutOfOrder {
        partition: PartitionKey,
        offset: i64,
        last: i64,
    },

    #[error("Changelog unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed changelog line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid partition on changelog line {line}: {reason}")]
    InvalidPartition { line: usize, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supplier of change-log records and replication ceilings
pub trait ChangelogSource: Send + Sync {
    /// Next records for a partition, in offset order; may be empty
    fn poll(&self, partition: &PartitionKey) -> Result<Vec<ChangelogRecord>, ChangelogError>;

    /// Committed ceilings for the given partitions
    ///
    /// A partition with no committed progress has no entry; a standby
    /// applies nothing for it until one appears.
    fn committed_ceiling(&self, partitions: &BTreeSet<PartitionKey>) -> Result<OffsetLimit, ChangelogError>;

    /// Position the next poll at the first record with `offset >= offset`
    fn seek(&self, partition: &PartitionKey, offset: i64) -> Result<(), ChangelogError>;

    /// Position the next poll at the earliest retained record
    fn seek_to_beginning(&self, partition: &PartitionKey) -> Result<(), ChangelogError>;
}
