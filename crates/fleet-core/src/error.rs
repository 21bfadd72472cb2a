//! Error types for the fleet autoscaler.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid label filter: {0}")]
    InvalidLabelFilter(String),

    #[error("Invalid key/value pair: {0}")]
    InvalidKeyValue(String),

    // Agent errors
    #[error("Agent not found: {0}")]
    NotFound(String),

    #[error("Agent already exists: {0}")]
    Conflict(String),

    #[error("Invalid agent name: {0}")]
    InvalidAgentName(String),

    #[error("Inconsistent state for {name}: {message}")]
    Inconsistent { name: String, message: String },

    // Adapter errors
    #[error("Client {op} failed: {message}")]
    Client { op: &'static str, message: String },

    #[error("Provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("Template error: {0}")]
    Template(String),

    // Infrastructure errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("{step} failed: {source}")]
    Step {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },

    #[error("{} error(s): {}", .0.len(), join_errors(.0))]
    Aggregate(Vec<Error>),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an error raised by a CI server call.
    pub fn client(op: &'static str, err: impl std::fmt::Display) -> Self {
        Error::Client {
            op,
            message: err.to_string(),
        }
    }

    /// Wrap an error raised by a cloud provider call.
    pub fn provider(provider: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: err.to_string(),
        }
    }

    /// Attach the reconcile step an error happened in.
    pub fn in_step(self, step: &'static str) -> Self {
        Error::Step {
            step,
            source: Box::new(self),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Collapse a list of errors: `Ok` when empty, the error itself when
    /// there is exactly one, `Aggregate` otherwise.
    pub fn collect(mut errors: Vec<Error>) -> Result<()> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }
}

fn join_errors(errors: &[Error]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_empty_is_ok() {
        assert!(Error::collect(vec![]).is_ok());
    }

    #[test]
    fn test_collect_single_error_is_unwrapped() {
        let err = Error::collect(vec![Error::NotFound("a".into())]).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_aggregate_display_lists_every_error() {
        let err = Error::collect(vec![
            Error::NotFound("pool-1-agent-a".into()),
            Error::client("agent_delete", "boom"),
        ])
        .unwrap_err();

        let msg = err.to_string();
        assert!(msg.starts_with("2 error(s)"));
        assert!(msg.contains("pool-1-agent-a"));
        assert!(msg.contains("Client agent_delete failed: boom"));
    }
}
