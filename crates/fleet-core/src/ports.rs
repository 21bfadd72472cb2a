//! Port traits (hexagonal architecture).
//!
//! The engine only talks to the outside world through these two traits:
//! the CI server's agent registry and job queue, and a cloud backend.

use crate::Result;
use crate::agent::{Agent, QueueInfo, Task};
use async_trait::async_trait;

/// Read/write access to the CI server's agent registry and job queue.
#[async_trait]
pub trait Client: Send + Sync {
    /// List every registered agent.
    async fn agent_list(&self) -> Result<Vec<Agent>>;

    /// Register a new agent. The returned agent carries the registry id
    /// and the agent token.
    async fn agent_create(&self, agent: &Agent) -> Result<Agent>;

    /// Update an agent (used for the `no_schedule` flag).
    async fn agent_update(&self, agent: &Agent) -> Result<Agent>;

    /// Delete an agent. Returns `Error::NotFound` when the entry is already
    /// gone; callers decide whether that matters.
    async fn agent_delete(&self, id: i64) -> Result<()>;

    /// Tasks currently assigned to an agent.
    async fn agent_tasks_list(&self, id: i64) -> Result<Vec<Task>>;

    /// Current queue snapshot.
    async fn queue_info(&self) -> Result<QueueInfo>;
}

/// A cloud backend that can host agent instances.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provision an instance for the agent, labelled so it can be found by
    /// pool membership later.
    async fn deploy_agent(&self, agent: &Agent) -> Result<()>;

    /// Deprovision the instance named `agent.name`. Must succeed when no
    /// such instance exists.
    async fn remove_agent(&self, agent: &Agent) -> Result<()>;

    /// Names of the instances currently provisioned for this pool.
    async fn list_deployed_agent_names(&self) -> Result<Vec<String>>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
