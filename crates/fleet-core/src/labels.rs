//! `key=value` label filter for queue accounting.

use crate::agent::Task;
use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Restricts which queued/running tasks count toward pool load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelFilter {
    pub key: String,
    pub value: String,
}

impl LabelFilter {
    pub fn matches(&self, task: &Task) -> bool {
        task.labels.get(&self.key) == Some(&self.value)
    }

    /// Number of tasks carrying the filter's label.
    pub fn count(&self, tasks: &[Task]) -> usize {
        tasks.iter().filter(|t| self.matches(t)).count()
    }
}

impl FromStr for LabelFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (key, value) = s
            .split_once('=')
            .ok_or_else(|| Error::InvalidLabelFilter(s.to_string()))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidLabelFilter(s.to_string()));
        }
        Ok(Self {
            key: key.to_string(),
            value: value.trim().to_string(),
        })
    }
}

impl fmt::Display for LabelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn task(arch: &str) -> Task {
        Task {
            labels: HashMap::from([("arch".to_string(), arch.to_string())]),
            ..Default::default()
        }
    }

    #[test]
    fn test_filter_counts_matching_tasks() {
        let filter: LabelFilter = "arch=amd64".parse().unwrap();
        let pending = vec![task("amd64"), task("arm64")];
        assert_eq!(filter.count(&pending), 1);
    }

    #[test]
    fn test_filter_ignores_tasks_without_label() {
        let filter: LabelFilter = "platform=linux".parse().unwrap();
        assert_eq!(filter.count(&[task("amd64"), Task::default()]), 0);
    }

    #[test]
    fn test_parse_rejects_missing_separator() {
        assert!("arch".parse::<LabelFilter>().is_err());
        assert!("=amd64".parse::<LabelFilter>().is_err());
    }
}
