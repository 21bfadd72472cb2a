//! Agent, task and queue types as reported by the CI server.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A CI worker as known to the CI server's agent registry.
///
/// Timestamps are unix seconds; `0` means "never".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(default)]
    pub no_schedule: bool,
    #[serde(default)]
    pub last_contact: i64,
    #[serde(default)]
    pub last_work: i64,
    #[serde(default)]
    pub created: i64,
}

impl Agent {
    /// A registry entry that has not been created yet.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Whether the agent ever phoned home.
    pub fn has_contacted(&self) -> bool {
        self.last_contact != 0
    }

    /// Time the agent is judged by for inactivity: the last contact, or the
    /// registry creation time for agents that never connected.
    pub fn activity_reference(&self) -> i64 {
        if self.has_contacted() {
            self.last_contact
        } else {
            self.created
        }
    }
}

/// A queued or running workflow task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub agent_id: i64,
}

/// Aggregate queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    #[serde(rename = "worker_count", default)]
    pub workers: usize,
    #[serde(rename = "pending_count", default)]
    pub pending: usize,
    #[serde(rename = "waiting_on_deps_count", default)]
    pub waiting_on_deps: usize,
    #[serde(rename = "running_count", default)]
    pub running: usize,
}

/// Point-in-time snapshot of the CI server's job queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueInfo {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub pending: Vec<Task>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub running: Vec<Task>,
    #[serde(default)]
    pub stats: QueueStats,
    #[serde(default)]
    pub paused: bool,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<Task>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Task>>::deserialize(deserializer)?.unwrap_or_default())
}
