//! Errors raised by the switch procedure.

use thiserror::Error;

use bluegreen_cluster::ClusterError;
use bluegreen_core::{ConfigError, Environment, ImageError};

pub type SwitchResult<T> = Result<T, SwitchError>;

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    /// The health gate failed for an environment about to take traffic.
    #[error("{env} failed the health gate: {reason}")]
    Unhealthy { env: Environment, reason: String },

    /// Rollback refused to switch to an unhealthy or absent environment.
    #[error("rollback to {target} aborted: {reason}")]
    RollbackAborted { target: Environment, reason: String },

    /// Switch target has no ready replicas.
    #[error("{env} has no ready replicas (use --force to switch anyway)")]
    NotReady { env: Environment },

    /// Scaling the active environment to zero would leave the main
    /// service with no endpoints.
    #[error("refusing to scale active environment {env} to zero")]
    ActiveScaleDown { env: Environment },

    /// Post-switch verification failed and traffic went back to `restored`.
    #[error("release of {tag} rolled back to {restored}: {reason}")]
    RolledBack {
        tag: String,
        restored: Environment,
        reason: String,
    },

    /// Post-switch verification failed and the rollback did not go
    /// through either, so traffic is still on the new environment.
    #[error("release of {tag} failed verification ({reason}) and could not roll back: {source}")]
    RollbackFailed {
        tag: String,
        reason: String,
        source: Box<SwitchError>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Image(#[from] ImageError),
}
