//! Error types for cluster backends.

use std::time::Duration;

use thiserror::Error;

use bluegreen_state::StateError;

/// Result type alias for cluster operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// A required tool, credential or namespace is missing. Raised before
    /// anything is mutated.
    #[error("prerequisite missing: {0}")]
    Prerequisite(String),

    #[error("apply rejected: {0}")]
    Apply(String),

    #[error("rollout of {name} did not complete within {timeout:?}")]
    RolloutTimeout { name: String, timeout: Duration },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("selector of {service} changed concurrently (read at revision {expected})")]
    Conflict { service: String, expected: String },

    #[error("`{command}` failed (exit code {code}): {stderr}")]
    Command {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("unexpected cluster response: {0}")]
    Parse(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    State(StateError),
}

impl From<StateError> for ClusterError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => ClusterError::NotFound(what),
            StateError::Conflict {
                service, expected, ..
            } => ClusterError::Conflict { service, expected },
            other => ClusterError::State(other),
        }
    }
}
