//! Configuration for standby

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root of the per-task state directories
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Driver commit cadence in milliseconds
    #[serde(default = "default_commit_interval_ms")]
    pub commit_interval_ms: u64,

    /// Driver poll cadence in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Records handed out per partition per poll
    #[serde(default = "default_max_poll_records")]
    pub max_poll_records: usize,

    /// Default log level when --log-level is not given
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("standby")
}

fn default_commit_interval_ms() -> u64 {
    crate::DEFAULT_COMMIT_INTERVAL_MS
}

fn default_poll_interval_ms() -> u64 {
    crate::DEFAULT_POLL_INTERVAL_MS
}

fn default_max_poll_records() -> usize {
    crate::DEFAULT_MAX_POLL_RECORDS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            commit_interval_ms: default_commit_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_records: default_max_poll_records(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            debug!(path = %config_path.display(), "Config::load: explicit path");
            return Self::load_file(config_path);
        }

        // Try default locations
        for path in Self::default_paths().iter().flatten() {
            if path.exists() {
                debug!(path = %path.display(), "Config::load: found default config");
                return Self::load_file(path);
            }
        }

        debug!("Config::load: no config file, using defaults");
        Ok(Config::default())
    }

    /// Log level from the config file, read before logging is set up
    ///
    /// Any problem loading the file yields `None`; `load` reports it later.
    pub fn load_log_level(path: Option<&PathBuf>) -> Option<String> {
        Self::load(path).ok()?.log_level
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    fn default_paths() -> [Option<PathBuf>; 2] {
        [
            dirs::config_dir().map(|p| p.join("standby").join("config.yml")),
            Some(PathBuf::from("standby.yml")),
        ]
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_partial_file_fills_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.yml");
        std::fs::write(&path, "state_dir: /var/lib/standby\npoll_interval_ms: 25\nlog_level: debug\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/standby"));
        assert_eq!(config.poll_interval_ms, 25);
        assert_eq!(config.commit_interval_ms, crate::DEFAULT_COMMIT_INTERVAL_MS);
        assert_eq!(config.max_poll_records, crate::DEFAULT_MAX_POLL_RECORDS);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("debug"));
    }

    #[test]
    fn test_save_and_load() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.yml");
        let config = Config {
            state_dir: temp.path().join("state"),
            commit_interval_ms: 1000,
            ..Config::default()
        };

        config.save(&path).unwrap();
        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.state_dir, config.state_dir);
        assert_eq!(loaded.commit_interval_ms, 1000);
        assert_eq!(loaded.log_level, None);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("absent.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert_eq!(Config::load_log_level(Some(&path)), None);
    }
}
