//! Fleet Core
//!
//! Domain types, ports and shared helpers for the fleet autoscaler.
//! Everything that both the reconciliation engine and the adapters
//! (CI server client, cloud providers) need to agree on lives here.

pub mod agent;
pub mod config;
pub mod error;
pub mod labels;
pub mod maps;
pub mod naming;
pub mod ports;
pub mod template;

pub use agent::{Agent, QueueInfo, QueueStats, Task};
pub use config::PoolConfig;
pub use error::{Error, Result};
pub use labels::LabelFilter;
pub use naming::AgentName;
pub use ports::{Client, Provider};
pub use template::{UserDataParams, UserDataTemplate};
