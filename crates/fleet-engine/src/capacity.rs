//! Capacity calculation.
//!
//! ```text
//! available = ceil((free + running) / workflows_per_agent)
//! required  = ceil((pending + running) / workflows_per_agent)
//! max_up    = max_agents - pool
//! max_down  = pool - min_agents
//! delta     = clamp(required - (available + pool), -max_down, max_up)
//! ```

use fleet_core::{LabelFilter, PoolConfig, QueueInfo};

/// Queue counters the formula works on, after label filtering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueLoad {
    pub free_workers: usize,
    pub running: usize,
    pub pending: usize,
}

impl QueueLoad {
    /// Derive the load from a queue snapshot. With a filter, running and
    /// pending are counted from the task lists; worker count is kept as is.
    pub fn from_queue(info: &QueueInfo, filter: Option<&LabelFilter>) -> Self {
        match filter {
            None => Self {
                free_workers: info.stats.workers,
                running: info.stats.running,
                pending: info.stats.pending,
            },
            Some(filter) => Self {
                free_workers: info.stats.workers,
                running: filter.count(&info.running),
                pending: filter.count(&info.pending),
            },
        }
    }
}

/// Signed number of agents to add (positive) or drain (negative).
///
/// `pool_agents` counts schedulable agents of the pool. The result always
/// lies in `[min_agents - pool_agents, max_agents - pool_agents]` for a
/// valid config (`min_agents <= max_agents`, `workflows_per_agent > 0`).
pub fn calc_agents(load: &QueueLoad, pool_agents: usize, config: &PoolConfig) -> i64 {
    let per_agent = config.workflows_per_agent;
    debug_assert!(per_agent > 0, "workflows_per_agent is validated at startup");

    let available = (load.free_workers + load.running).div_ceil(per_agent) as i64;
    let required = (load.pending + load.running).div_ceil(per_agent) as i64;

    let pool = pool_agents as i64;
    let max_up = config.max_agents as i64 - pool;
    let max_down = pool - config.min_agents as i64;

    let delta = required - (available + pool);
    delta.max(-max_down).min(max_up)
}
