//! StandbyDriver - the execution loop that feeds a standby task
//!
//! Polls the change-log source per owned partition, hands batches to the
//! task, keeps whatever lies beyond the ceiling buffered, and commits on a
//! fixed cadence. A partition with a buffered remainder is paused: it is not
//! polled again until the remainder has drained.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::changelog::ChangelogSource;
use crate::config::Config;
use crate::domain::{ChangelogRecord, PartitionKey};
use crate::error::{TaskError, TaskResult};
use crate::task::{StandbyTask, Task, TaskState};

/// Driver cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    pub poll_interval: Duration,
    pub commit_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for DriverConfig {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            commit_interval: Duration::from_millis(config.commit_interval_ms.max(1)),
        }
    }
}

/// Counters for one driver run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Records the task consumed, including already-applied ones it skipped
    pub consumed: u64,
    pub polls: u64,
    pub commits: u64,
    /// Records held back at the ceiling
    pub buffered: usize,
}

/// Owning loop for one running `StandbyTask`
pub struct StandbyDriver {
    task: StandbyTask,
    source: Arc<dyn ChangelogSource>,
    config: DriverConfig,
    buffered: BTreeMap<PartitionKey, Vec<ChangelogRecord>>,
    stats: DriverStats,
}

impl std::fmt::Debug for StandbyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandbyDriver")
            .field("config", &self.config)
            .field("buffered", &self.buffered)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl StandbyDriver {
    /// Take over a running task and position the source after its checkpoint
    pub fn new(task: StandbyTask, source: Arc<dyn ChangelogSource>, config: DriverConfig) -> TaskResult<Self> {
        debug!(task_id = %task.id(), ?config, "StandbyDriver::new: called");
        if task.state() != TaskState::Running {
            return Err(TaskError::IllegalState {
                task_id: task.id(),
                state: task.state(),
                operation: "drive",
            });
        }

        let committed = task.committed_offsets();
        for partition in task.owned_partitions() {
            match committed.get(partition) {
                Some(offset) => source.seek(partition, offset + 1)?,
                None => source.seek_to_beginning(partition)?,
            }
        }

        Ok(Self {
            task,
            source,
            config,
            buffered: BTreeMap::new(),
            stats: DriverStats::default(),
        })
    }

    pub fn task(&self) -> &StandbyTask {
        &self.task
    }

    pub fn stats(&self) -> DriverStats {
        DriverStats {
            buffered: self.buffered.values().map(Vec::len).sum(),
            ..self.stats
        }
    }

    /// One round over every owned partition; returns the records consumed
    pub fn poll_once(&mut self) -> TaskResult<usize> {
        self.stats.polls += 1;
        let partitions: Vec<PartitionKey> = self.task.owned_partitions().iter().cloned().collect();

        let mut consumed = 0usize;
        for partition in partitions {
            let records = match self.buffered.remove(&partition) {
                Some(remainder) => remainder,
                None => self.source.poll(&partition)?,
            };
            if records.is_empty() {
                continue;
            }

            let offered = records.len();
            let remainder = self.task.update(&partition, records)?;
            consumed += offered - remainder.len();
            if !remainder.is_empty() {
                debug!(%partition, held = remainder.len(), "StandbyDriver::poll_once: partition paused at ceiling");
                self.buffered.insert(partition, remainder);
            }
        }

        self.stats.consumed += consumed as u64;
        debug!(task_id = %self.task.id(), consumed, "StandbyDriver::poll_once: done");
        Ok(consumed)
    }

    /// Commit the task
    pub fn commit(&mut self) -> TaskResult<()> {
        self.task.commit()?;
        self.stats.commits += 1;
        Ok(())
    }

    /// Poll until a round consumes nothing; returns the records consumed
    pub fn catch_up(&mut self) -> TaskResult<u64> {
        debug!(task_id = %self.task.id(), "StandbyDriver::catch_up: called");
        let mut total = 0u64;
        loop {
            let consumed = self.poll_once()?;
            if consumed == 0 {
                break;
            }
            total += consumed as u64;
        }
        Ok(total)
    }

    /// Poll and commit on the configured cadence until `shutdown` turns true
    ///
    /// Commits and closes the task on the way out. On error the task is
    /// closed, releasing its directory lock, and the error is returned.
    ///
    /// Store I/O runs inline on the calling worker thread.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> TaskResult<DriverStats> {
        info!(task_id = %self.task.id(), config = ?self.config, "Standby driver started");
        let mut poll_tick = time::interval(self.config.poll_interval);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut commit_tick = time::interval_at(
            time::Instant::now() + self.config.commit_interval,
            self.config.commit_interval,
        );
        commit_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // poll_once and commit block this worker on store writes and fsync.
        // Spawn the driver on a runtime with spare workers, or on a dedicated
        // thread, when other tasks share it.
        while !*shutdown.borrow() {
            let step = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("StandbyDriver::run: shutdown sender dropped");
                        break;
                    }
                    Ok(())
                }
                _ = poll_tick.tick() => self.poll_once().map(|_| ()),
                _ = commit_tick.tick() => self.commit(),
            };

            if let Err(e) = step {
                error!(task_id = %self.task.id(), error = %e, "Standby driver stopped on error");
                if let Err(close_err) = self.task.close() {
                    warn!(task_id = %self.task.id(), error = %close_err, "Failed to close task after error");
                }
                return Err(e);
            }
        }

        self.shutdown()
    }

    /// Final commit (skipped for a failed task), then close
    pub fn shutdown(mut self) -> TaskResult<DriverStats> {
        debug!(task_id = %self.task.id(), "StandbyDriver::shutdown: called");
        let commit_result = if self.task.is_failed() { Ok(()) } else { self.commit() };
        let close_result = self.task.close();
        let stats = self.stats();
        commit_result.and(close_result)?;
        info!(task_id = %self.task.id(), ?stats, "Standby driver stopped");
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changelog::MemoryChangelog;
    use crate::domain::TaskId;
    use crate::state::MemoryProvider;
    use statestore::StateDirectory;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn p0() -> PartitionKey {
        PartitionKey::new("orders", 0)
    }

    fn source_with(count: i64, max_poll: usize) -> Arc<MemoryChangelog> {
        let source = Arc::new(MemoryChangelog::new(max_poll));
        for offset in 0..count {
            source
                .append(ChangelogRecord::put(p0(), offset, format!("k{}", offset), "v"))
                .unwrap();
        }
        source
    }

    fn running_task(temp: &tempfile::TempDir, provider: Arc<MemoryProvider>, source: Arc<MemoryChangelog>) -> StandbyTask {
        let mut task = StandbyTask::new(
            TaskId::new(0, 0),
            BTreeSet::from([p0()]),
            StateDirectory::open(temp.path()).unwrap(),
            provider,
            source,
        );
        task.initialize().unwrap();
        task
    }

    #[test]
    fn test_driver_requires_running_task() {
        let temp = tempdir().unwrap();
        let source = source_with(0, 10);
        let task = StandbyTask::new(
            TaskId::new(0, 0),
            BTreeSet::from([p0()]),
            StateDirectory::open(temp.path()).unwrap(),
            Arc::new(MemoryProvider::new()),
            source.clone(),
        );

        let err = StandbyDriver::new(task, source, DriverConfig::default()).unwrap_err();
        assert!(matches!(err, TaskError::IllegalState { operation: "drive", .. }));
    }

    #[test]
    fn test_remainder_pauses_partition() {
        let temp = tempdir().unwrap();
        let source = source_with(10, 4);
        source.set_ceiling(p0(), 3).unwrap();
        let task = running_task(&temp, Arc::new(MemoryProvider::new()), source.clone());
        let mut driver = StandbyDriver::new(task, source.clone(), DriverConfig::default()).unwrap();

        assert_eq!(driver.poll_once().unwrap(), 3);
        assert_eq!(driver.stats().buffered, 1);
        // Paused: the source cursor does not move while the remainder waits
        assert_eq!(driver.poll_once().unwrap(), 0);
        assert_eq!(source.lag(&p0()).unwrap(), 6);

        source.set_ceiling(p0(), 100).unwrap();
        driver.commit().unwrap();
        assert_eq!(driver.catch_up().unwrap(), 7);
        assert_eq!(driver.task().applied_offsets().unwrap().get(&p0()), Some(&9));

        let stats = driver.shutdown().unwrap();
        assert_eq!(stats.consumed, 10);
        assert_eq!(stats.commits, 2);
        assert_eq!(stats.buffered, 0);
    }

    #[test]
    fn test_driver_seeks_past_checkpoint() {
        let temp = tempdir().unwrap();
        let source = source_with(6, 100);
        source.set_ceiling(p0(), 4).unwrap();

        let provider = Arc::new(MemoryProvider::new());
        let task = running_task(&temp, provider.clone(), source.clone());
        let mut driver = StandbyDriver::new(task, source.clone(), DriverConfig::default()).unwrap();
        driver.catch_up().unwrap();
        driver.shutdown().unwrap();

        // Same directory, new task instance: resumes at offset 4
        source.set_ceiling(p0(), 6).unwrap();
        let task = running_task(&temp, provider, source.clone());
        assert_eq!(task.committed_offsets().get(&p0()), Some(3));

        let mut driver = StandbyDriver::new(task, source.clone(), DriverConfig::default()).unwrap();
        assert_eq!(driver.poll_once().unwrap(), 2);
    }
}
