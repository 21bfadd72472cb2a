//! In-memory CI server and cloud provider used by the engine tests.

#![allow(dead_code)]

use async_trait::async_trait;
use fleet_core::{Agent, Client, Error, PoolConfig, Provider, QueueInfo, Result, Task};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const POOL: &str = "1";

/// Ordered record of every mutating call, shared by both mocks.
pub type Journal = Arc<Mutex<Vec<String>>>;

pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn config(min_agents: usize, max_agents: usize) -> PoolConfig {
    PoolConfig {
        pool_id: POOL.to_string(),
        min_agents,
        max_agents,
        workflows_per_agent: 1,
        ..Default::default()
    }
}

/// A pool agent that is connected and has not worked for an hour.
pub fn agent(id: i64, suffix: &str) -> Agent {
    let now = now();
    Agent {
        id,
        name: format!("pool-{}-agent-{}", POOL, suffix),
        last_contact: now - 5,
        last_work: now - 3600,
        created: now - 7200,
        ..Default::default()
    }
}

pub fn drained(id: i64, suffix: &str) -> Agent {
    Agent {
        no_schedule: true,
        ..agent(id, suffix)
    }
}

#[derive(Default)]
pub struct MockClient {
    pub agents: Mutex<Vec<Agent>>,
    pub tasks: Mutex<HashMap<i64, Vec<Task>>>,
    pub queue: Mutex<QueueInfo>,
    pub journal: Journal,
    next_id: Mutex<i64>,
    /// Number of upcoming `agent_create` calls answered with a conflict.
    pub conflicts: AtomicUsize,
    pub fail_list: AtomicBool,
    pub fail_queue: AtomicBool,
    /// Agent names whose `agent_delete` fails.
    pub fail_delete: Mutex<HashSet<String>>,
}

impl MockClient {
    pub fn new(agents: Vec<Agent>, journal: Journal) -> Self {
        let next_id = agents.iter().map(|a| a.id).max().unwrap_or(0) + 1;
        Self {
            agents: Mutex::new(agents),
            journal,
            next_id: Mutex::new(next_id),
            ..Default::default()
        }
    }

    pub fn registered(&self) -> Vec<Agent> {
        self.agents.lock().unwrap().clone()
    }

    pub fn get(&self, name: &str) -> Option<Agent> {
        self.registered().into_iter().find(|a| a.name == name)
    }

    pub fn set_tasks(&self, agent_id: i64, count: usize) {
        let tasks = (0..count)
            .map(|i| Task {
                id: i.to_string(),
                agent_id,
                ..Default::default()
            })
            .collect();
        self.tasks.lock().unwrap().insert(agent_id, tasks);
    }

    pub fn set_pending(&self, count: usize) {
        let mut queue = self.queue.lock().unwrap();
        queue.pending = vec![Task::default(); count];
        queue.stats.pending = count;
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Client for MockClient {
    async fn agent_list(&self) -> Result<Vec<Agent>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::Http("connection refused".into()));
        }
        Ok(self.registered())
    }

    async fn agent_create(&self, agent: &Agent) -> Result<Agent> {
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Conflict(agent.name.clone()));
        }

        let mut next_id = self.next_id.lock().unwrap();
        let created = Agent {
            id: *next_id,
            token: format!("token-{}", *next_id),
            created: now(),
            ..agent.clone()
        };
        *next_id += 1;

        self.record(format!("client.create {}", created.name));
        self.agents.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn agent_update(&self, agent: &Agent) -> Result<Agent> {
        let mut agents = self.agents.lock().unwrap();
        let existing = agents
            .iter_mut()
            .find(|a| a.id == agent.id)
            .ok_or_else(|| Error::NotFound(agent.id.to_string()))?;
        *existing = agent.clone();
        drop(agents);

        self.record(format!("client.update {} no_schedule={}", agent.name, agent.no_schedule));
        Ok(agent.clone())
    }

    async fn agent_delete(&self, id: i64) -> Result<()> {
        let mut agents = self.agents.lock().unwrap();
        let index = agents
            .iter()
            .position(|a| a.id == id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        if self.fail_delete.lock().unwrap().contains(&agents[index].name) {
            return Err(Error::Http("internal server error".into()));
        }
        let removed = agents.remove(index);
        drop(agents);

        self.record(format!("client.delete {}", removed.name));
        Ok(())
    }

    async fn agent_tasks_list(&self, id: i64) -> Result<Vec<Task>> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned().unwrap_or_default())
    }

    async fn queue_info(&self) -> Result<QueueInfo> {
        if self.fail_queue.load(Ordering::SeqCst) {
            return Err(Error::Http("queue unavailable".into()));
        }
        Ok(self.queue.lock().unwrap().clone())
    }
}

#[derive(Default)]
pub struct MockProvider {
    pub instances: Mutex<BTreeSet<String>>,
    pub journal: Journal,
    pub fail_deploy: AtomicBool,
    pub fail_list: AtomicBool,
    /// Leave freshly deployed instances out of listings, like an eventually
    /// consistent cloud API.
    pub hide_new: AtomicBool,
    hidden: Mutex<BTreeSet<String>>,
    /// Instance names whose removal fails.
    pub fail_remove: Mutex<HashSet<String>>,
}

impl MockProvider {
    pub fn new<S: AsRef<str>>(instances: &[S], journal: Journal) -> Self {
        Self {
            instances: Mutex::new(instances.iter().map(|s| s.as_ref().to_string()).collect()),
            journal,
            ..Default::default()
        }
    }

    pub fn deployed(&self) -> BTreeSet<String> {
        self.instances.lock().unwrap().clone()
    }

    fn record(&self, entry: String) {
        self.journal.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn deploy_agent(&self, agent: &Agent) -> Result<()> {
        if self.fail_deploy.load(Ordering::SeqCst) {
            return Err(Error::provider("mock", "quota exceeded"));
        }
        if self.hide_new.load(Ordering::SeqCst) {
            self.hidden.lock().unwrap().insert(agent.name.clone());
        }
        self.instances.lock().unwrap().insert(agent.name.clone());
        self.record(format!("provider.deploy {}", agent.name));
        Ok(())
    }

    async fn remove_agent(&self, agent: &Agent) -> Result<()> {
        if self.fail_remove.lock().unwrap().contains(&agent.name) {
            return Err(Error::provider("mock", "instance locked"));
        }
        self.instances.lock().unwrap().remove(&agent.name);
        self.record(format!("provider.remove {}", agent.name));
        Ok(())
    }

    async fn list_deployed_agent_names(&self) -> Result<Vec<String>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::provider("mock", "rate limited"));
        }
        let hidden = self.hidden.lock().unwrap();
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|name| !hidden.contains(*name))
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub struct Harness {
    pub client: Arc<MockClient>,
    pub provider: Arc<MockProvider>,
    pub journal: Journal,
}

impl Harness {
    /// Registry and provider that agree on every agent.
    pub fn consistent(agents: Vec<Agent>) -> Self {
        let names: Vec<String> = agents.iter().map(|a| a.name.clone()).collect();
        Self::new(agents, &names)
    }

    pub fn new<S: AsRef<str>>(agents: Vec<Agent>, instances: &[S]) -> Self {
        let journal = Journal::default();
        Self {
            client: Arc::new(MockClient::new(agents, journal.clone())),
            provider: Arc::new(MockProvider::new(instances, journal.clone())),
            journal,
        }
    }

    pub fn autoscaler(&self, config: PoolConfig) -> fleet_engine::Autoscaler {
        fleet_engine::Autoscaler::new(config, self.client.clone(), self.provider.clone())
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.lock().unwrap().clone()
    }
}
