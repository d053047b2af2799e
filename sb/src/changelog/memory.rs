//! In-memory change log
//!
//! Per-partition append-only logs with a read cursor each, plus settable
//! ceilings. Can be loaded from a JSON-lines file for offline replay.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{ChangelogError, ChangelogSource};
use crate::domain::{ChangelogRecord, OffsetLimit, PartitionKey};

/// One line of a JSON-lines change-log file
///
/// Keys and values are UTF-8 strings; `value: null` is a tombstone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangelogLine {
    pub source: String,
    pub partition: u32,
    pub offset: i64,
    pub key: String,
    pub value: Option<String>,
}

impl TryFrom<ChangelogLine> for ChangelogRecord {
    type Error = String;

    /// Fails when the source name is not usable as a file name component
    fn try_from(line: ChangelogLine) -> Result<Self, Self::Error> {
        PartitionKey::validate_source(&line.source)?;
        Ok(Self {
            partition: PartitionKey::new(line.source, line.partition),
            offset: line.offset,
            key: line.key.into_bytes(),
            value: line.value.map(String::into_bytes),
        })
    }
}

#[derive(Debug, Default)]
struct Inner {
    logs: BTreeMap<PartitionKey, Vec<ChangelogRecord>>,
    /// Index of the next record to hand out per partition
    positions: BTreeMap<PartitionKey, usize>,
    ceilings: OffsetLimit,
}

/// In-memory `ChangelogSource`
#[derive(Debug)]
pub struct MemoryChangelog {
    inner: Mutex<Inner>,
    max_poll_records: usize,
}

impl MemoryChangelog {
    /// Create an empty change log handing out at most `max_poll_records` per poll
    pub fn new(max_poll_records: usize) -> Self {
        debug!(max_poll_records, "MemoryChangelog::new: called");
        Self {
            inner: Mutex::new(Inner::default()),
            max_poll_records: max_poll_records.max(1),
        }
    }

    /// Load every line of a JSON-lines file
    pub fn from_jsonl(path: impl AsRef<Path>, max_poll_records: usize) -> Result<Self, ChangelogError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "MemoryChangelog::from_jsonl: called");
        let changelog = Self::new(max_poll_records);
        let reader = BufReader::new(fs::File::open(path)?);

        let mut count = 0usize;
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let parsed: ChangelogLine =
                serde_json::from_str(&line).map_err(|source| ChangelogError::Parse { line: index + 1, source })?;
            let record = ChangelogRecord::try_from(parsed)
                .map_err(|reason| ChangelogError::InvalidPartition { line: index + 1, reason })?;
            changelog.append(record)?;
            count += 1;
        }

        info!(path = %path.display(), count, "Loaded changelog file");
        Ok(changelog)
    }

    /// Append a record; offsets must increase per partition
    pub fn append(&self, record: ChangelogRecord) -> Result<(), ChangelogError> {
        let mut inner = self.lock()?;
        let log = inner.logs.entry(record.partition.clone()).or_default();
        if let Some(last) = log.last()
            && last.offset >= record.offset
        {
            return Err(ChangelogError::OutOfOrder {
                partition: record.partition,
                offset: record.offset,
                last: last.offset,
            });
        }
        log.push(record);
        Ok(())
    }

    /// Set the committed ceiling reported for a partition
    pub fn set_ceiling(&self, partition: PartitionKey, offset: i64) -> Result<(), ChangelogError> {
        debug!(%partition, offset, "MemoryChangelog::set_ceiling: called");
        self.lock()?.ceilings.insert(partition, offset);
        Ok(())
    }

    /// Partitions with at least one record
    pub fn partitions(&self) -> Result<BTreeSet<PartitionKey>, ChangelogError> {
        Ok(self.lock()?.logs.keys().cloned().collect())
    }

    /// Records not yet handed out for a partition
    pub fn lag(&self, partition: &PartitionKey) -> Result<usize, ChangelogError> {
        let inner = self.lock()?;
        let total = inner.logs.get(partition).map_or(0, Vec::len);
        let position = inner.positions.get(partition).copied().unwrap_or(0);
        Ok(total.saturating_sub(position))
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, ChangelogError> {
        self.inner
            .lock()
            .map_err(|_| ChangelogError::Unavailable("changelog state lock poisoned".to_string()))
    }
}

impl Default for MemoryChangelog {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MAX_POLL_RECORDS)
    }
}

impl ChangelogSource for MemoryChangelog {
    fn poll(&self, partition: &PartitionKey) -> Result<Vec<ChangelogRecord>, ChangelogError> {
        let mut inner = self.lock()?;
        let Some(log) = inner.logs.get(partition) else {
            return Ok(Vec::new());
        };
        let start = inner.positions.get(partition).copied().unwrap_or(0);
        let end = (start + self.max_poll_records).min(log.len());
        let batch = log.get(start..end).map(<[ChangelogRecord]>::to_vec).unwrap_or_default();
        inner.positions.insert(partition.clone(), end.max(start));
        debug!(%partition, start, count = batch.len(), "MemoryChangelog::poll: returning");
        Ok(batch)
    }

    fn committed_ceiling(&self, partitions: &BTreeSet<PartitionKey>) -> Result<OffsetLimit, ChangelogError> {
        let inner = self.lock()?;
        Ok(inner
            .ceilings
            .iter()
            .filter(|(p, _)| partitions.contains(*p))
            .map(|(p, o)| (p.clone(), *o))
            .collect())
    }

    fn seek(&self, partition: &PartitionKey, offset: i64) -> Result<(), ChangelogError> {
        debug!(%partition, offset, "MemoryChangelog::seek: called");
        let mut inner = self.lock()?;
        let position = inner
            .logs
            .get(partition)
            .map_or(0, |log| log.partition_point(|r| r.offset < offset));
        inner.positions.insert(partition.clone(), position);
        Ok(())
    }

    fn seek_to_beginning(&self, partition: &PartitionKey) -> Result<(), ChangelogError> {
        debug!(%partition, "MemoryChangelog::seek_to_beginning: called");
        self.lock()?.positions.insert(partition.clone(), 0);
        Ok(())
    }
}
