//! Pool-scoped agent names.
//!
//! The name `pool-<pool_id>-agent-<suffix>` is the only key shared by the
//! CI server's registry and the cloud provider's inventory, so every
//! component goes through [`AgentName`] instead of matching strings itself.

use crate::{Error, Result};
use rand::Rng;
use rand::distributions::Alphanumeric;
use std::fmt;
use std::str::FromStr;

const POOL_PREFIX: &str = "pool-";
const AGENT_SEPARATOR: &str = "-agent-";

/// Length of generated suffixes.
pub const SUFFIX_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AgentName {
    pool_id: String,
    suffix: String,
}

impl AgentName {
    /// Build a name from its parts, validating both.
    pub fn new(pool_id: impl Into<String>, suffix: impl Into<String>) -> Result<Self> {
        let pool_id = pool_id.into();
        let suffix = suffix.into();
        validate_pool_id(&pool_id)?;
        if suffix.is_empty() || !suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidAgentName(format!(
                "suffix must be non-empty ascii alphanumeric: {:?}",
                suffix
            )));
        }
        Ok(Self { pool_id, suffix })
    }

    /// Generate a fresh name with a random lowercase alphanumeric suffix.
    pub fn generate(pool_id: &str) -> Result<Self> {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(SUFFIX_LENGTH)
            .map(|b| char::from(b).to_ascii_lowercase())
            .collect();
        Self::new(pool_id, suffix)
    }

    /// Whether `name` is an agent of the given pool.
    pub fn belongs_to(name: &str, pool_id: &str) -> bool {
        name.parse::<AgentName>()
            .map(|n| n.pool_id == pool_id)
            .unwrap_or(false)
    }

    pub fn pool_id(&self) -> &str {
        &self.pool_id
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}{}",
            POOL_PREFIX, self.pool_id, AGENT_SEPARATOR, self.suffix
        )
    }
}

impl FromStr for AgentName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix(POOL_PREFIX)
            .ok_or_else(|| Error::InvalidAgentName(s.to_string()))?;
        // The suffix never contains '-', so the last separator is the real one.
        let (pool_id, suffix) = rest
            .rsplit_once(AGENT_SEPARATOR)
            .ok_or_else(|| Error::InvalidAgentName(s.to_string()))?;
        Self::new(pool_id, suffix).map_err(|_| Error::InvalidAgentName(s.to_string()))
    }
}

/// Pool ids become part of hostnames and label values.
pub fn validate_pool_id(pool_id: &str) -> Result<()> {
    if pool_id.is_empty() {
        return Err(Error::InvalidConfig("pool id must not be empty".into()));
    }
    if !pool_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::InvalidConfig(format!(
            "pool id may only contain ascii alphanumerics, '-' and '_': {:?}",
            pool_id
        )));
    }
    Ok(())
}
