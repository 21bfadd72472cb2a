//! Pool configuration.

use crate::labels::LabelFilter;
use crate::naming::validate_pool_id;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::time::Duration;

/// Immutable tunables for one autoscaled pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Lower capacity bound (agents).
    pub min_agents: usize,
    /// Upper capacity bound (agents).
    pub max_agents: usize,
    /// Workflows one agent runs in parallel.
    pub workflows_per_agent: usize,
    /// Pool identity, embedded in every agent name.
    pub pool_id: String,
    /// Max time since last contact (or creation) before an agent is abandoned.
    pub agent_inactivity_timeout: Duration,
    /// Min time since last completed work before an agent may be removed.
    pub agent_idle_timeout: Duration,
    /// Only tasks carrying this label count toward load.
    pub filter_labels: Option<LabelFilter>,
    /// Agent container image handed to providers.
    pub image: String,
    /// Extra agent environment.
    pub environment: BTreeMap<String, String>,
    /// gRPC endpoint agents connect to.
    pub grpc_address: String,
    pub grpc_secure: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_agents: 1,
            max_agents: 10,
            workflows_per_agent: 2,
            pool_id: "1".to_string(),
            agent_inactivity_timeout: Duration::from_secs(10 * 60),
            agent_idle_timeout: Duration::from_secs(10 * 60),
            filter_labels: None,
            image: "woodpeckerci/woodpecker-agent:next".to_string(),
            environment: BTreeMap::new(),
            grpc_address: "woodpecker-server:9000".to_string(),
            grpc_secure: false,
        }
    }
}

impl PoolConfig {
    /// Reject configurations the engine cannot run with. Called once before
    /// the reconcile loop starts.
    pub fn validate(&self) -> Result<()> {
        if self.workflows_per_agent == 0 {
            return Err(Error::InvalidConfig(
                "workflows per agent must be greater than zero".into(),
            ));
        }
        if self.min_agents > self.max_agents {
            return Err(Error::InvalidConfig(format!(
                "min agents ({}) must not exceed max agents ({})",
                self.min_agents, self.max_agents
            )));
        }
        validate_pool_id(&self.pool_id)?;
        Ok(())
    }
}
