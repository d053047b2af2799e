//! Change-log records and state writes

use super::PartitionKey;

/// One change-log entry
///
/// `value: None` is a tombstone: applying it deletes the key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangelogRecord {
    pub partition: PartitionKey,
    pub offset: i64,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl ChangelogRecord {
    /// A record that sets `key` to `value`
    pub fn put(partition: PartitionKey, offset: i64, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            partition,
            offset,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A record that deletes `key`
    pub fn tombstone(partition: PartitionKey, offset: i64, key: impl Into<Vec<u8>>) -> Self {
        Self {
            partition,
            offset,
            key: key.into(),
            value: None,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// A store write emitted by an active task's topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateWrite {
    pub partition: PartitionKey,
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl StateWrite {
    pub fn put(partition: PartitionKey, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            partition,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn delete(partition: PartitionKey, key: impl Into<Vec<u8>>) -> Self {
        Self {
            partition,
            key: key.into(),
            value: None,
        }
    }
}
