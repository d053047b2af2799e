use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result, bail};
use tracing::{debug, info};

use standby::cli::{Cli, Command};
use standby::config::Config;
use standby::domain::{PartitionKey, TaskId};
use standby::driver::{DriverConfig, StandbyDriver};
use standby::state::{CheckpointFile, SqliteProvider};
use standby::task::StandbyTask;
use standby::{ChangelogSource, MemoryChangelog};
use statestore::{SqliteStore, StateDirectory, StateStore, StoreError};

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    debug!("Logging initialized (level: {:?})", level);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if let Some(state_dir) = cli.state_dir {
        config.state_dir = state_dir;
    }
    info!(state_dir = %config.state_dir.display(), "standby starting");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Replay {
            task_id,
            changelog,
            ceiling,
        } => replay(&config, task_id, &changelog, ceiling),
        Command::Checkpoint { task_id } => show_checkpoint(&config, task_id),
        Command::Dump { task_id, partition } => dump(&config, task_id, &partition),
    }
}

fn replay(config: &Config, task_id: TaskId, changelog_path: &Path, ceiling: Vec<(PartitionKey, i64)>) -> Result<()> {
    let source = Arc::new(
        MemoryChangelog::from_jsonl(changelog_path, config.max_poll_records)
            .with_context(|| format!("Failed to load changelog {}", changelog_path.display()))?,
    );
    for (partition, offset) in ceiling {
        source.set_ceiling(partition, offset)?;
    }

    let partitions = source.partitions()?;
    if partitions.is_empty() {
        bail!("Changelog {} has no records", changelog_path.display());
    }

    let state_dir = StateDirectory::open(&config.state_dir).context("Failed to open state directory")?;
    let mut task = StandbyTask::new(
        task_id,
        partitions,
        state_dir,
        Arc::new(SqliteProvider),
        source.clone() as Arc<dyn ChangelogSource>,
    );
    task.initialize()
        .with_context(|| format!("Failed to initialize task {}", task_id))?;

    let mut driver = StandbyDriver::new(task, source, DriverConfig::from(config))?;
    let consumed = driver.catch_up()?;
    let stats = driver.shutdown()?;

    println!(
        "{} Replayed task {}: {} consumed, {} held at ceiling",
        "✓".green(),
        task_id.to_string().cyan(),
        consumed,
        stats.buffered
    );
    show_checkpoint(config, task_id)
}

fn show_checkpoint(config: &Config, task_id: TaskId) -> Result<()> {
    let state_dir = StateDirectory::open(&config.state_dir).context("Failed to open state directory")?;
    let checkpoint = CheckpointFile::new(state_dir.task_dir(&task_id.to_string()))
        .read()
        .with_context(|| format!("Failed to read checkpoint for task {}", task_id))?;

    match checkpoint {
        Some(offsets) if !offsets.is_empty() => {
            for (partition, offset) in offsets {
                println!("{} {}", partition.to_string().yellow(), offset);
            }
        }
        _ => println!("No checkpoint"),
    }
    Ok(())
}

fn dump(config: &Config, task_id: TaskId, partition: &PartitionKey) -> Result<()> {
    let state_dir = StateDirectory::open(&config.state_dir).context("Failed to open state directory")?;
    let lock = match state_dir.lock(&task_id.to_string()) {
        Ok(lock) => lock,
        Err(StoreError::Locked { .. }) => bail!("Task {} is in use by another process", task_id),
        Err(e) => return Err(e).context("Failed to lock task directory"),
    };

    let path = SqliteProvider::store_path(lock.dir(), partition);
    if !path.exists() {
        bail!("No store for {} in task {}", partition, task_id);
    }
    let mut store = SqliteStore::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
    let entries = store.entries()?;
    debug!(path = %store.path().display(), count = entries.len(), "dump: read store");
    if entries.is_empty() {
        println!("Store {} is empty", partition);
    }
    for (key, value) in entries {
        println!(
            "{} = {}",
            String::from_utf8_lossy(&key).cyan(),
            String::from_utf8_lossy(&value)
        );
    }

    store.close()?;
    lock.unlock()?;
    Ok(())
}
