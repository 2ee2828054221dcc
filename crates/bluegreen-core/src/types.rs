//! Shared types used across bluegreen crates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::ImageRef;

/// Label key carrying the environment on pods, deployments and the main
/// service selector.
pub const SELECTOR_KEY: &str = "environment";

/// Label key carrying the application name.
pub const APP_LABEL: &str = "app";

// ── Environment ───────────────────────────────────────────────────

/// One of the two parallel environments.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Blue,
    Green,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    #[error("unknown environment '{0}' (expected 'blue' or 'green')")]
    Unknown(String),
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Blue, Environment::Green];

    /// The opposite environment.
    pub fn other(self) -> Self {
        match self {
            Environment::Blue => Environment::Green,
            Environment::Green => Environment::Blue,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Environment::Blue => "blue",
            Environment::Green => "green",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = EnvironmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "blue" => Ok(Environment::Blue),
            "green" => Ok(Environment::Green),
            _ => Err(EnvironmentError::Unknown(s.to_string())),
        }
    }
}

// ── Deployment ────────────────────────────────────────────────────

/// Observed state of one environment's deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub environment: Environment,
    pub image: ImageRef,
    /// Desired replica count.
    pub replicas: u32,
    /// Replicas currently passing readiness.
    pub ready_replicas: u32,
    /// Bumped every time a changed deployment is applied.
    pub generation: u64,
    /// Unix timestamp (seconds) of the last change.
    pub updated_at: u64,
}

impl DeploymentRecord {
    /// Whether every desired replica is ready.
    pub fn is_rolled_out(&self) -> bool {
        self.ready_replicas >= self.replicas
    }

    /// Whether the deployment can take traffic at all.
    pub fn is_serving(&self) -> bool {
        self.ready_replicas > 0
    }
}

// ── Selector ──────────────────────────────────────────────────────

/// The main service's environment selector together with the revision it
/// was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorState {
    /// `None` when the selector key is not set.
    pub active: Option<Environment>,
    /// Opaque revision (`resourceVersion` on Kubernetes).
    pub revision: String,
}

impl SelectorState {
    /// The active environment, defaulting to blue when unset.
    pub fn active_or_default(&self) -> Environment {
        self.active.unwrap_or_default()
    }
}

/// A completed traffic switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchRecord {
    pub from: Option<Environment>,
    pub to: Environment,
    /// Selector revision after the switch.
    pub revision: String,
    pub switched_at: u64,
}

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
