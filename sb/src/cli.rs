//! CLI argument parsing for standby

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::domain::{PartitionKey, TaskId};

#[derive(Parser, Debug)]
#[command(name = "sb")]
#[command(author, version, about = "Standby replica replay and checkpoint tool", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Root of the per-task state directories (overrides config)
    #[arg(short, long)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a JSON-lines change log into a task's stores and checkpoint it
    Replay {
        /// Task id, as <group>_<partition>
        #[arg(required = true)]
        task_id: TaskId,

        /// JSON-lines change-log file
        #[arg(long, required = true)]
        changelog: PathBuf,

        /// Replication ceiling, as <source>-<partition>=<offset> (repeatable)
        #[arg(long, value_parser = parse_ceiling)]
        ceiling: Vec<(PartitionKey, i64)>,
    },

    /// Show a task's durable checkpoint
    Checkpoint {
        /// Task id, as <group>_<partition>
        #[arg(required = true)]
        task_id: TaskId,
    },

    /// Print the contents of one partition's store
    Dump {
        /// Task id, as <group>_<partition>
        #[arg(required = true)]
        task_id: TaskId,

        /// Change-log partition, as <source>-<partition>
        #[arg(required = true)]
        partition: PartitionKey,
    },
}

/// Parse `<source>-<partition>=<offset>`
pub fn parse_ceiling(s: &str) -> Result<(PartitionKey, i64), String> {
    let (partition, offset) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid ceiling '{}': expected <source>-<partition>=<offset>", s))?;
    let partition: PartitionKey = partition.parse()?;
    let offset = offset
        .parse()
        .map_err(|_| format!("Invalid ceiling '{}': bad offset '{}'", s, offset))?;
    Ok((partition, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ceiling() {
        assert_eq!(
            parse_ceiling("orders-changelog-2=17").unwrap(),
            (PartitionKey::new("orders-changelog", 2), 17)
        );
        assert!(parse_ceiling("orders-2").is_err());
        assert!(parse_ceiling("orders-2=x").is_err());
    }

    #[test]
    fn test_replay_args() {
        let cli = Cli::try_parse_from([
            "sb",
            "--state-dir",
            "/tmp/state",
            "replay",
            "0_1",
            "--changelog",
            "log.jsonl",
            "--ceiling",
            "orders-0=3",
            "--ceiling",
            "orders-1=9",
        ])
        .unwrap();

        assert_eq!(cli.state_dir, Some(PathBuf::from("/tmp/state")));
        match cli.command {
            Command::Replay { task_id, ceiling, .. } => {
                assert_eq!(task_id, TaskId::new(0, 1));
                assert_eq!(ceiling.len(), 2);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
