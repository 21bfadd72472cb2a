//! The reconciliation engine.
//!
//! One [`Autoscaler`] manages one pool. Every call to
//! [`Autoscaler::reconcile`] rebuilds the agent snapshot from the CI server,
//! computes the capacity delta and drives the agent lifecycle:
//!
//! ```text
//! absent   --create_agents-->        active
//! active   --drain_agents-->         draining (no_schedule)
//! draining --remove_agent (idle)-->  absent
//! draining --remove_agent (busy)-->  draining, retried next tick
//! active   --cleanup_stale_agents--> absent (abandoned agents only)
//! ```
//!
//! Nothing is kept between ticks apart from the tick counter; the registry
//! and the provider inventory are the only sources of truth.

use crate::capacity::{QueueLoad, calc_agents};
use crate::report::ReconcileReport;
use fleet_core::{Agent, AgentName, Client, Error, PoolConfig, Provider, Result};
use fleet_trace::{agent_span, reconcile_span, step_span};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, warn};

/// Attempts at finding an unused agent name before giving up.
const MAX_NAME_ATTEMPTS: usize = 3;

pub struct Autoscaler {
    config: PoolConfig,
    client: Arc<dyn Client>,
    provider: Arc<dyn Provider>,
    /// Pool agents as loaded at the start of the tick, kept current as the
    /// tick creates and removes agents.
    agents: Vec<Agent>,
    /// Agents registered and deployed during this tick. The provider's
    /// listing may not include them yet.
    created_this_tick: HashSet<String>,
    report: ReconcileReport,
    tick: u64,
}

impl Autoscaler {
    pub fn new(config: PoolConfig, client: Arc<dyn Client>, provider: Arc<dyn Provider>) -> Self {
        Self {
            config,
            client,
            provider,
            agents: Vec::new(),
            created_this_tick: HashSet::new(),
            report: ReconcileReport::default(),
            tick: 0,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// The current agent snapshot.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// Pool agents, optionally without the drained ones.
    pub fn pool_agents(&self, exclude_no_schedule: bool) -> Vec<&Agent> {
        self.agents
            .iter()
            .filter(|a| !(exclude_no_schedule && a.no_schedule))
            .collect()
    }

    /// Run one full reconciliation tick.
    ///
    /// A failure to load the agent list aborts the tick. Every later step
    /// runs even if an earlier one failed; their errors are returned
    /// together once the tick is over.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport> {
        self.tick += 1;
        let span = reconcile_span(&self.config.pool_id, self.tick);
        self.run_tick().instrument(span).await
    }

    async fn run_tick(&mut self) -> Result<ReconcileReport> {
        self.load_agents()
            .instrument(step_span("load_agents"))
            .await
            .map_err(|e| e.in_step("load_agents"))?;

        let mut errors = Vec::new();

        match self.calc_agents().instrument(step_span("calc_agents")).await {
            Ok(delta) if delta > 0 => {
                debug!(amount = delta, "starting additional agents");
                if let Err(e) = self
                    .create_agents(delta.unsigned_abs() as usize)
                    .instrument(step_span("create_agents"))
                    .await
                {
                    errors.push(e.in_step("create_agents"));
                }
            }
            Ok(delta) if delta < 0 => {
                debug!(amount = -delta, "checking agents for draining");
                if let Err(e) = self
                    .drain_agents(delta.unsigned_abs() as usize)
                    .instrument(step_span("drain_agents"))
                    .await
                {
                    errors.push(e.in_step("drain_agents"));
                }
            }
            Ok(_) => debug!("pool size matches demand"),
            Err(e) => errors.push(e.in_step("calc_agents")),
        }

        if let Err(e) = self
            .cleanup_dangling_agents()
            .instrument(step_span("cleanup_dangling_agents"))
            .await
        {
            errors.push(e.in_step("cleanup_dangling_agents"));
        }

        if let Err(e) = self
            .cleanup_stale_agents()
            .instrument(step_span("cleanup_stale_agents"))
            .await
        {
            errors.push(e.in_step("cleanup_stale_agents"));
        }

        if let Err(e) = self
            .remove_drained_agents()
            .instrument(step_span("remove_drained_agents"))
            .await
        {
            errors.push(e.in_step("remove_drained_agents"));
        }

        let report = std::mem::take(&mut self.report);
        info!(
            tick = report.tick,
            delta = report.delta,
            agents = self.agents.len(),
            reactivated = report.reactivated,
            created = report.created,
            drained = report.drained,
            dangling_instances = report.dangling_instances_removed,
            dangling_registrations = report.dangling_registrations_removed,
            stale_removed = report.stale_removed,
            drained_removed = report.drained_removed,
            failed_steps = errors.len(),
            "Reconciliation finished"
        );

        for e in &errors {
            error!(error = %e, "Reconcile step failed");
        }

        Error::collect(errors).map(|()| report)
    }

    /// Refresh the snapshot with the registry's agents of this pool.
    pub async fn load_agents(&mut self) -> Result<()> {
        self.report = ReconcileReport {
            tick: self.tick,
            ..Default::default()
        };
        self.created_this_tick.clear();

        let agents = self
            .client
            .agent_list()
            .await
            .map_err(|e| Error::client("agent_list", e))?;

        let pool_id = &self.config.pool_id;
        self.agents = agents
            .into_iter()
            .filter(|a| AgentName::belongs_to(&a.name, pool_id))
            .collect();

        debug!(agents = self.agents.len(), "Loaded pool agents");
        Ok(())
    }

    /// Fetch the queue and compute the capacity delta for this tick.
    pub async fn calc_agents(&mut self) -> Result<i64> {
        let info = self
            .client
            .queue_info()
            .await
            .map_err(|e| Error::client("queue_info", e))?;
        let load = QueueLoad::from_queue(&info, self.config.filter_labels.as_ref());
        let pool_agents = self.pool_agents(true).len();

        let delta = calc_agents(&load, pool_agents, &self.config);
        debug!(
            free_workers = load.free_workers,
            running = load.running,
            pending = load.pending,
            pool_agents,
            min = self.config.min_agents,
            max = self.config.max_agents,
            delta,
            "Capacity calculated"
        );

        self.report.delta = delta;
        Ok(delta)
    }

    /// Bring `amount` agents into service: reactivate drained agents first,
    /// then register and deploy new ones.
    ///
    /// A failed deploy leaves its registry entry behind; the next tick's
    /// dangling cleanup deletes it.
    pub async fn create_agents(&mut self, amount: usize) -> Result<()> {
        let mut remaining = amount;

        for agent in self.agents.iter_mut().filter(|a| a.no_schedule) {
            if remaining == 0 {
                break;
            }
            info!(agent = %agent.name, "Reactivating agent");
            let update = Agent {
                no_schedule: false,
                ..agent.clone()
            };
            self.client
                .agent_update(&update)
                .await
                .map_err(|e| Error::client("agent_update", e))?;
            agent.no_schedule = false;
            remaining -= 1;
            self.report.reactivated += 1;
        }

        for _ in 0..remaining {
            let agent = self.register_agent().await?;

            info!(agent = %agent.name, provider = self.provider.name(), "Deploying agent");
            if let Err(e) = self
                .provider
                .deploy_agent(&agent)
                .instrument(agent_span(&agent.name, "deploy"))
                .await
            {
                warn!(
                    agent = %agent.name,
                    error = %e,
                    "Deploy failed, registration left for dangling cleanup"
                );
                return Err(e);
            }

            self.created_this_tick.insert(agent.name.clone());
            self.agents.push(agent);
            self.report.created += 1;
        }

        Ok(())
    }

    /// Register a new agent under a fresh name, retrying on name collisions.
    async fn register_agent(&self) -> Result<Agent> {
        let mut attempt = 1;
        loop {
            let name = AgentName::generate(&self.config.pool_id)?;
            match self.client.agent_create(&Agent::named(name.to_string())).await {
                Ok(agent) => return Ok(agent),
                Err(e) if e.is_conflict() && attempt < MAX_NAME_ATTEMPTS => {
                    warn!(agent = %name, attempt, "Agent name taken, generating another");
                    attempt += 1;
                }
                Err(e) => return Err(Error::client("agent_create", e)),
            }
        }
    }

    /// Mark up to `amount` schedulable agents as `no_schedule`. Agents that
    /// never contacted the server may still be booting and are left alone,
    /// as are agents that finished work within the idle timeout.
    pub async fn drain_agents(&mut self, amount: usize) -> Result<()> {
        let now = now();
        let idle_timeout = self.config.agent_idle_timeout.as_secs() as i64;
        let mut drained = 0;

        for agent in self.agents.iter_mut() {
            if drained == amount {
                break;
            }
            if agent.no_schedule || !agent.has_contacted() {
                continue;
            }
            if now - agent.last_work < idle_timeout {
                debug!(agent = %agent.name, "Agent worked recently, not draining");
                continue;
            }

            info!(agent = %agent.name, "Draining agent");
            let update = Agent {
                no_schedule: true,
                ..agent.clone()
            };
            self.client
                .agent_update(&update)
                .await
                .map_err(|e| Error::client("agent_update", e))?;
            agent.no_schedule = true;
            drained += 1;
            self.report.drained += 1;
        }

        if drained < amount {
            debug!(requested = amount, drained, "Not enough agents eligible for draining");
        }
        Ok(())
    }

    /// An agent is idle when it holds no tasks and has not finished work
    /// within the idle timeout. The time check covers the gap between a job
    /// being assigned and its task showing up.
    pub async fn is_agent_idle(&self, agent: &Agent) -> Result<bool> {
        let tasks = self
            .client
            .agent_tasks_list(agent.id)
            .await
            .map_err(|e| Error::client("agent_tasks_list", e))?;
        if !tasks.is_empty() {
            return Ok(false);
        }

        let idle_for = now() - agent.last_work;
        Ok(idle_for >= self.config.agent_idle_timeout.as_secs() as i64)
    }

    /// Remove an idle agent: instance first, then registry entry. Returns
    /// whether the agent was removed. Busy agents and agents already removed
    /// earlier in the tick are left as they are.
    pub async fn remove_agent(&mut self, agent: &Agent, reason: &str) -> Result<bool> {
        if !self.agents.iter().any(|a| a.id == agent.id) {
            debug!(agent = %agent.name, "Agent already removed");
            return Ok(false);
        }

        if !self.is_agent_idle(agent).await? {
            info!(agent = %agent.name, reason, "Agent is still processing work");
            return Ok(false);
        }

        info!(agent = %agent.name, reason, "Removing agent");
        self.provider
            .remove_agent(agent)
            .instrument(agent_span(&agent.name, "remove"))
            .await?;

        match self.client.agent_delete(agent.id).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                debug!(agent = %agent.name, "Registry entry already gone");
            }
            Err(e) => return Err(Error::client("agent_delete", e)),
        }

        self.agents.retain(|a| a.id != agent.id);
        Ok(true)
    }

    /// Remove every drained agent that has become idle.
    pub async fn remove_drained_agents(&mut self) -> Result<()> {
        let drained: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| a.no_schedule)
            .cloned()
            .collect();

        let mut errors = Vec::new();
        for agent in drained {
            match self.remove_agent(&agent, "drained").await {
                Ok(true) => self.report.drained_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(agent = %agent.name, error = %e, "Failed to remove drained agent");
                    errors.push(e);
                }
            }
        }
        Error::collect(errors)
    }

    /// Reconcile the registry with the provider inventory: destroy instances
    /// nobody registered, delete registrations no instance backs.
    pub async fn cleanup_dangling_agents(&mut self) -> Result<()> {
        let deployed: BTreeSet<String> = self
            .provider
            .list_deployed_agent_names()
            .await?
            .into_iter()
            .collect();
        let registered: HashSet<String> = self.agents.iter().map(|a| a.name.clone()).collect();

        let mut errors = Vec::new();

        for name in deployed.iter().filter(|n| !registered.contains(*n)) {
            if !AgentName::belongs_to(name, &self.config.pool_id) {
                warn!(instance = %name, "Ignoring instance not named for this pool");
                continue;
            }

            info!(agent = %name, reason = "not registered on the CI server", "Removing instance");
            match self
                .provider
                .remove_agent(&Agent::named(name.as_str()))
                .instrument(agent_span(name, "remove"))
                .await
            {
                Ok(()) => self.report.dangling_instances_removed += 1,
                Err(e) => {
                    warn!(agent = %name, error = %e, "Failed to remove dangling instance");
                    errors.push(e);
                }
            }
        }

        let unbacked: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| !deployed.contains(&a.name) && !self.created_this_tick.contains(&a.name))
            .cloned()
            .collect();

        for agent in unbacked {
            info!(agent = %agent.name, reason = "not found on provider", "Deleting registration");
            match self.client.agent_delete(agent.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    warn!(agent = %agent.name, error = %e, "Failed to delete dangling registration");
                    errors.push(Error::client("agent_delete", e));
                    continue;
                }
            }
            self.agents.retain(|a| a.id != agent.id);
            self.report.dangling_registrations_removed += 1;
        }

        Error::collect(errors)
    }

    /// Remove schedulable agents that stopped talking to the server. Agents
    /// that never connected are judged by their age.
    pub async fn cleanup_stale_agents(&mut self) -> Result<()> {
        let now = now();
        let timeout = self.config.agent_inactivity_timeout.as_secs() as i64;
        let stale: Vec<Agent> = self
            .agents
            .iter()
            .filter(|a| !a.no_schedule && now - a.activity_reference() > timeout)
            .cloned()
            .collect();

        let mut errors = Vec::new();
        for agent in stale {
            match self.remove_agent(&agent, "stale").await {
                Ok(true) => self.report.stale_removed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(agent = %agent.name, error = %e, "Failed to remove stale agent");
                    errors.push(e);
                }
            }
        }
        Error::collect(errors)
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
