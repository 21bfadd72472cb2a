//! Spans for reconciliation work.

use tracing::{Level, Span, span};

/// Span covering one reconciliation tick of a pool.
pub fn reconcile_span(pool_id: &str, tick: u64) -> Span {
    span!(
        Level::INFO,
        "reconcile",
        fleet.pool.id = pool_id,
        fleet.tick = tick,
    )
}

/// Span for one step of a tick (`calc_agents`, `create_agents`, ...).
pub fn step_span(step: &'static str) -> Span {
    span!(Level::DEBUG, "reconcile.step", fleet.step = step)
}

/// Span for a lifecycle operation on a single agent.
pub fn agent_span(agent_name: &str, operation: &'static str) -> Span {
    span!(
        Level::DEBUG,
        "agent.operation",
        operation = operation,
        fleet.agent.name = agent_name,
    )
}
