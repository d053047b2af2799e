//! Integration tests for standby
//!
//! These tests drive standby tasks against real on-disk state: SQLite stores,
//! checkpoint files and directory locks under a temp directory.

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use standby::changelog::MemoryChangelog;
use standby::domain::{ChangelogRecord, OffsetMap, PartitionKey, TaskId};
use standby::driver::{DriverConfig, StandbyDriver};
use standby::error::TaskError;
use standby::state::{CHECKPOINT_FILE_NAME, CheckpointFile, MemoryProvider, SqliteProvider, StoreProvider};
use standby::task::{StandbyTask, Task, TaskState};
use statestore::StateDirectory;
use tempfile::TempDir;

fn p0() -> PartitionKey {
    PartitionKey::new("orders-changelog", 0)
}

fn p1() -> PartitionKey {
    PartitionKey::new("orders-changelog", 1)
}

fn record(partition: &PartitionKey, offset: i64) -> ChangelogRecord {
    ChangelogRecord::put(partition.clone(), offset, format!("key-{}", offset), format!("value-{}", offset))
}

fn records(partition: &PartitionKey, offsets: std::ops::Range<i64>) -> Vec<ChangelogRecord> {
    offsets.map(|o| record(partition, o)).collect()
}

/// Change log source whose active side has committed up to `ceiling` on every partition
fn committed_source(partitions: &[PartitionKey], ceiling: i64) -> Arc<MemoryChangelog> {
    let source = Arc::new(MemoryChangelog::default());
    for partition in partitions {
        source.set_ceiling(partition.clone(), ceiling).unwrap();
    }
    source
}

fn standby(
    temp: &TempDir,
    partitions: &[PartitionKey],
    provider: Arc<dyn StoreProvider>,
    source: Arc<MemoryChangelog>,
) -> StandbyTask {
    StandbyTask::new(
        TaskId::new(0, 0),
        partitions.iter().cloned().collect::<BTreeSet<_>>(),
        StateDirectory::open(temp.path()).expect("Failed to open state dir"),
        provider,
        source,
    )
}

// =============================================================================
// Restart / Checkpoint Durability Tests
// =============================================================================

#[test]
fn test_restart_resumes_from_checkpoint() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = Arc::new(MemoryChangelog::default());
    source.set_ceiling(p0(), 5).unwrap();

    let mut task = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source.clone());
    task.initialize().unwrap();
    assert!(task.committed_offsets().is_empty());

    let remainder = task.update(&p0(), records(&p0(), 0..5)).unwrap();
    assert!(remainder.is_empty());
    task.commit().unwrap();
    assert_eq!(task.committed_offsets(), OffsetMap::from([(p0(), 4)]));
    task.close().unwrap();

    // Restart against the same directory
    let mut restarted = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source);
    restarted.initialize().unwrap();
    assert_eq!(restarted.committed_offsets(), OffsetMap::from([(p0(), 4)]));

    let store = restarted.store(&p0()).unwrap();
    for offset in 0..5 {
        let key = format!("key-{}", offset);
        assert_eq!(
            store.get(key.as_bytes()).unwrap(),
            Some(format!("value-{}", offset).into_bytes()),
            "record {} missing after restart",
            offset
        );
    }
    assert_eq!(store.entries().unwrap().len(), 5);
}

#[test]
fn test_unflushed_progress_is_lost_on_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = committed_source(&[p0()], 100);

    let mut task = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source.clone());
    task.initialize().unwrap();
    task.update(&p0(), records(&p0(), 0..3)).unwrap();
    task.commit().unwrap();
    task.update(&p0(), records(&p0(), 3..6)).unwrap();
    task.close().unwrap();

    let mut restarted = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source);
    restarted.initialize().unwrap();
    assert_eq!(restarted.committed_offsets().get(&p0()), Some(2));
    assert_eq!(restarted.store(&p0()).unwrap().entries().unwrap().len(), 3);
}

#[test]
fn test_crash_mid_checkpoint_keeps_previous() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = committed_source(&[p0(), p1()], 100);

    let mut task = standby(&temp_dir, &[p0(), p1()], Arc::new(SqliteProvider), source.clone());
    task.initialize().unwrap();
    task.update(&p0(), records(&p0(), 0..4)).unwrap();
    task.update(&p1(), records(&p1(), 0..2)).unwrap();
    task.commit().unwrap();
    drop(task);

    // Simulate a crash after the temp file was written but before the rename
    let task_dir = temp_dir.path().join("0_0");
    fs::write(task_dir.join(".checkpoint.a1b2c3.tmp"), "{\"version\":0,\"offsets\":[{\"sour").unwrap();

    let mut restarted = standby(&temp_dir, &[p0(), p1()], Arc::new(SqliteProvider), source);
    restarted.initialize().unwrap();
    assert_eq!(restarted.committed_offsets(), OffsetMap::from([(p0(), 3), (p1(), 1)]));
    assert!(task_dir.join(CHECKPOINT_FILE_NAME).exists());
    assert!(!task_dir.join(".checkpoint.a1b2c3.tmp").exists());
}

#[test]
fn test_idempotent_replay_after_restart() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = committed_source(&[p0()], 100);

    let batch = vec![
        ChangelogRecord::put(p0(), 0, "a", "1"),
        ChangelogRecord::put(p0(), 1, "b", "1"),
        ChangelogRecord::tombstone(p0(), 2, "a"),
        ChangelogRecord::put(p0(), 3, "b", "2"),
    ];

    let mut task = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source.clone());
    task.initialize().unwrap();
    task.update(&p0(), batch.clone()).unwrap();
    task.commit().unwrap();
    let once = task.store(&p0()).unwrap().entries().unwrap();
    task.close().unwrap();

    // Replaying the whole batch again changes nothing
    let mut restarted = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source);
    restarted.initialize().unwrap();
    let remainder = restarted.update(&p0(), batch).unwrap();
    assert!(remainder.is_empty());
    restarted.commit().unwrap();

    let twice = restarted.store(&p0()).unwrap().entries().unwrap();
    assert_eq!(once, twice);
    assert_eq!(twice, vec![(b"b".to_vec(), b"2".to_vec())]);
    assert_eq!(restarted.committed_offsets().get(&p0()), Some(3));
}

#[test]
fn test_nothing_applied_without_committed_progress() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = committed_source(&[p1()], 2);

    let mut task = standby(&temp_dir, &[p0(), p1()], Arc::new(SqliteProvider), source.clone());
    task.initialize().unwrap();
    assert_eq!(task.offset_limit(&p0()), Some(0));

    let held = task.update(&p0(), records(&p0(), 0..5)).unwrap();
    assert_eq!(held.len(), 5);
    assert_eq!(task.update(&p1(), records(&p1(), 0..5)).unwrap().len(), 3);
    assert!(task.store(&p0()).unwrap().entries().unwrap().is_empty());
    task.commit().unwrap();
    task.close().unwrap();

    let mut restarted = standby(&temp_dir, &[p0(), p1()], Arc::new(SqliteProvider), source);
    restarted.initialize().unwrap();
    assert_eq!(restarted.committed_offsets(), OffsetMap::from([(p1(), 1)]));
    assert!(restarted.store(&p0()).unwrap().entries().unwrap().is_empty());
}

#[test]
fn test_checkpoint_reader_does_not_disturb_running_writer() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = committed_source(&[p0()], 100);

    let mut task = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source);
    task.initialize().unwrap();
    task.update(&p0(), records(&p0(), 0..3)).unwrap();
    task.commit().unwrap();

    // A writer holding the lock is between temp write and rename
    let task_dir = temp_dir.path().join("0_0");
    let pending = tempfile::Builder::new()
        .prefix(".checkpoint.")
        .suffix(".tmp")
        .tempfile_in(&task_dir)
        .expect("Failed to create temp file");
    fs::copy(task_dir.join(CHECKPOINT_FILE_NAME), pending.path()).unwrap();

    let reader = CheckpointFile::new(&task_dir);
    assert_eq!(reader.read().unwrap(), Some(OffsetMap::from([(p0(), 2)])));
    assert!(pending.path().exists());
    pending.persist(task_dir.join(CHECKPOINT_FILE_NAME)).unwrap();

    task.close().unwrap();
}

// =============================================================================
// Lock Exclusivity Tests
// =============================================================================

#[test]
fn test_lock_exclusivity() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = Arc::new(MemoryChangelog::default());

    let mut first = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source.clone());
    let mut second = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source);

    let results = [first.initialize(), second.initialize()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(matches!(results[1], Err(TaskError::ResourceUnavailable { .. })));
    assert_eq!(second.state(), TaskState::Created);

    first.close().unwrap();
    second.initialize().unwrap();
}

#[test]
fn test_lock_released_when_task_dropped() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = Arc::new(MemoryChangelog::default());

    let mut task = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source.clone());
    task.initialize().unwrap();
    drop(task);

    let mut next = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source);
    next.initialize().unwrap();
}

// =============================================================================
// Fatal Error Tests
// =============================================================================

#[test]
fn test_fatal_flush_keeps_last_checkpoint_usable() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let provider = Arc::new(MemoryProvider::new());
    let source = committed_source(&[p0()], 100);

    let mut task = standby(&temp_dir, &[p0()], provider.clone(), source.clone());
    task.initialize().unwrap();
    task.update(&p0(), records(&p0(), 0..3)).unwrap();
    task.commit().unwrap();

    task.update(&p0(), records(&p0(), 3..6)).unwrap();
    let store = provider.store(&temp_dir.path().join("0_0"), &p0()).unwrap();
    store.fail_flushes(Some("device error")).unwrap();

    let err = task.commit().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(task.update(&p0(), records(&p0(), 6..7)), Err(TaskError::TaskFailed { .. })));
    task.close().unwrap();

    // A replacement task picks up from the last good checkpoint
    store.fail_flushes(None).unwrap();
    let mut replacement = standby(&temp_dir, &[p0()], provider, source);
    replacement.initialize().unwrap();
    assert_eq!(replacement.committed_offsets().get(&p0()), Some(2));
    assert_eq!(replacement.store(&p0()).unwrap().entries().unwrap().len(), 3);
}

#[test]
fn test_update_rejects_unowned_partition() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = Arc::new(MemoryChangelog::default());
    let mut task = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source);
    task.initialize().unwrap();

    let err = task.update(&p1(), records(&p1(), 0..1)).unwrap_err();
    assert!(matches!(err, TaskError::InvalidPartition { .. }));
    assert!(!err.is_fatal());
    assert!(!task.is_failed());
}

// =============================================================================
// Driver Tests
// =============================================================================

#[tokio::test]
async fn test_driver_drains_remainder_when_ceiling_advances() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let source = Arc::new(MemoryChangelog::new(3));
    for offset in 0..10 {
        source.append(record(&p0(), offset)).unwrap();
    }
    source.set_ceiling(p0(), 4).unwrap();

    let mut task = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source.clone());
    task.initialize().unwrap();

    let config = DriverConfig {
        poll_interval: Duration::from_millis(5),
        commit_interval: Duration::from_millis(20),
    };
    let driver = StandbyDriver::new(task, source.clone(), config).unwrap();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(driver.run(shutdown_rx));

    // Held at the ceiling until the active side commits further
    tokio::time::sleep(Duration::from_millis(100)).await;
    source.set_ceiling(p0(), 10).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    shutdown_tx.send(true).unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("Driver should shut down")
        .expect("Driver task panicked")
        .unwrap();

    assert_eq!(stats.consumed, 10);
    assert_eq!(stats.buffered, 0);
    assert!(stats.commits >= 2);

    // The final commit left a checkpoint covering every record
    let mut restarted = standby(&temp_dir, &[p0()], Arc::new(SqliteProvider), source);
    restarted.initialize().unwrap();
    assert_eq!(restarted.committed_offsets().get(&p0()), Some(9));
}

#[tokio::test]
async fn test_driver_closes_task_on_error() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let provider = Arc::new(MemoryProvider::new());
    let source = committed_source(&[p0()], 100);
    for offset in 0..3 {
        source.append(record(&p0(), offset)).unwrap();
    }

    let mut task = standby(&temp_dir, &[p0()], provider.clone(), source.clone());
    task.initialize().unwrap();
    provider
        .store(&temp_dir.path().join("0_0"), &p0())
        .unwrap()
        .fail_flushes(Some("device error"))
        .unwrap();

    let config = DriverConfig {
        poll_interval: Duration::from_millis(5),
        commit_interval: Duration::from_millis(20),
    };
    let driver = StandbyDriver::new(task, source.clone(), config).unwrap();
    let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let result = tokio::time::timeout(Duration::from_secs(5), driver.run(shutdown_rx))
        .await
        .expect("Driver should stop on a fatal error");
    assert!(result.unwrap_err().is_fatal());

    // The lock was released on the way out
    let mut next = standby(&temp_dir, &[p0()], provider, source);
    next.initialize().unwrap();
}
