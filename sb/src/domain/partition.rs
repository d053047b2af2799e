//! Change-log partition identity

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One change-log partition: source name plus partition number
///
/// Ordered by source, then partition, so maps keyed by it iterate
/// deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub source: String,
    pub partition: u32,
}

impl PartitionKey {
    /// Create a partition key
    pub fn new(source: impl Into<String>, partition: u32) -> Self {
        Self {
            source: source.into(),
            partition,
        }
    }

    /// Check that the source name is safe to use as a file name component
    ///
    /// Allowed characters are ASCII letters, digits, `.`, `_` and `-`; the
    /// names `.` and `..` are rejected.
    pub fn validate_source(source: &str) -> Result<(), String> {
        if source.is_empty() {
            return Err("empty source".to_string());
        }
        if source == "." || source == ".." {
            return Err(format!("source '{}' is reserved", source));
        }
        if let Some(c) = source
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        {
            return Err(format!("source '{}' contains '{}'", source, c.escape_default()));
        }
        Ok(())
    }

    /// `validate_source` applied to this key
    pub fn validate(&self) -> Result<(), String> {
        Self::validate_source(&self.source)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.source, self.partition)
    }
}

impl FromStr for PartitionKey {
    type Err = String;

    /// Parse `"{source}-{partition}"`; the source may itself contain dashes
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (source, partition) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("Invalid partition '{}': expected <source>-<partition>", s))?;
        Self::validate_source(source).map_err(|reason| format!("Invalid partition '{}': {}", s, reason))?;
        let partition = partition
            .parse()
            .map_err(|_| format!("Invalid partition '{}': bad number '{}'", s, partition))?;
        Ok(Self::new(source, partition))
    }
}
