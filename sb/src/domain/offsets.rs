//! Offset maps, ceilings and committed snapshots

use std::collections::BTreeMap;
use std::sync::Arc;

use super::PartitionKey;

/// Partition to last-applied (or last-checkpointed) offset
pub type OffsetMap = BTreeMap<PartitionKey, i64>;

/// Partition to replication ceiling
///
/// A record is applied only while `record.offset < limit`. A partition with
/// no entry gets its owner's default: `UNCOMMITTED` for a standby,
/// `UNBOUNDED` for an active task restoring its own state.
pub type OffsetLimit = BTreeMap<PartitionKey, i64>;

/// Ceiling that places no bound on replay
pub const UNBOUNDED: i64 = i64::MAX;

/// Ceiling for a partition with no committed progress: nothing is applied
pub const UNCOMMITTED: i64 = 0;

/// Read-only snapshot of a durable checkpoint
///
/// Clones share the same map; nothing a holder does can reach the task's
/// internal state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommittedOffsets(Arc<OffsetMap>);

impl CommittedOffsets {
    /// Checkpointed offset for a partition, if any
    pub fn get(&self, partition: &PartitionKey) -> Option<i64> {
        self.0.get(partition).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PartitionKey, i64)> {
        self.0.iter().map(|(p, o)| (p, *o))
    }

    /// Partitions with a checkpointed offset
    pub fn partitions(&self) -> impl Iterator<Item = &PartitionKey> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Owned copy of the underlying map
    pub fn to_map(&self) -> OffsetMap {
        self.0.as_ref().clone()
    }
}

impl From<OffsetMap> for CommittedOffsets {
    fn from(map: OffsetMap) -> Self {
        Self(Arc::new(map))
    }
}

impl PartialEq<OffsetMap> for CommittedOffsets {
    fn eq(&self, other: &OffsetMap) -> bool {
        self.0.as_ref() == other
    }
}
