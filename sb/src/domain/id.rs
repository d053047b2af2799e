//! Task identity

use std::fmt;
use std::str::FromStr;

/// Stable assignment unit: a topology group and a partition group
///
/// Displays as `"{group}_{partition}"`, which is also the name of the task's
/// state directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId {
    pub group: u32,
    pub partition: u32,
}

impl TaskId {
    /// Create a task id
    pub fn new(group: u32, partition: u32) -> Self {
        Self { group, partition }
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.group, self.partition)
    }
}

impl FromStr for TaskId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, partition) = s
            .split_once('_')
            .ok_or_else(|| format!("Invalid task id '{}': expected <group>_<partition>", s))?;
        let group = group
            .parse()
            .map_err(|_| format!("Invalid task id '{}': bad group '{}'", s, group))?;
        let partition = partition
            .parse()
            .map_err(|_| format!("Invalid task id '{}': bad partition '{}'", s, partition))?;
        Ok(Self { group, partition })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_parse() {
        let id = TaskId::new(3, 12);
        assert_eq!(id.to_string(), "3_12");
        assert_eq!("3_12".parse::<TaskId>().unwrap(), id);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!("3".parse::<TaskId>().is_err());
        assert!("a_1".parse::<TaskId>().is_err());
        assert!("1_".parse::<TaskId>().is_err());
    }
}
