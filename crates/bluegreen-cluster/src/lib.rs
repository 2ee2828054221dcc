//! bluegreen-cluster — the seam between the switch procedure and the
//! orchestrator that actually owns deployments and services.
//!
//! # Components
//!
//! - **`Cluster`** — the operations the switch procedure needs
//! - **`kubectl`** — `KubectlCluster`, drives a real cluster through `kubectl`
//! - **`local`** — `LocalCluster`, a redb-backed stand-in for development and tests
//! - **`manifest`** — Deployment/Service/HPA rendering

pub mod error;
pub mod kubectl;
pub mod local;
pub mod manifest;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use bluegreen_core::config::Backend;
use bluegreen_core::{BgConfig, DeploymentRecord, Environment, SelectorState, SwitchRecord};

pub use error::{ClusterError, ClusterResult};
pub use kubectl::KubectlCluster;
pub use local::LocalCluster;
pub use manifest::{DeploymentManifest, Manifest, ManifestKind};

/// Boxed future returned by every `Cluster` operation.
pub type ClusterFuture<'a, T> = Pin<Box<dyn Future<Output = ClusterResult<T>> + Send + 'a>>;

/// What a command is about to change. `preflight` checks the matching
/// permissions up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Reads and probes only.
    Read,
    /// Creates, updates or scales deployments.
    Deployments,
    /// Moves the main service selector.
    Selector,
    /// Deployments and services both.
    Full,
}

impl Access {
    /// `(verb, resource)` pairs that must be allowed.
    pub fn required(self) -> &'static [(&'static str, &'static str)] {
        match self {
            Access::Read => &[],
            Access::Deployments => &[("patch", "deployments")],
            Access::Selector => &[("patch", "services")],
            Access::Full => &[("patch", "deployments"), ("patch", "services")],
        }
    }
}

/// Orchestrator operations used by the switch procedure.
///
/// All names (deployments, services, namespace) are fixed when the
/// backend is built from a `BgConfig`; callers only talk in environments.
pub trait Cluster: Send + Sync {
    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Check tools, and the credentials `access` needs, before anything
    /// is mutated.
    fn preflight(&self, access: Access) -> ClusterFuture<'_, ()>;

    /// Create or update an environment's deployment.
    fn apply_deployment<'a>(&'a self, manifest: &'a DeploymentManifest) -> ClusterFuture<'a, ()>;

    /// Block until the environment's rollout completes or `timeout` elapses.
    fn wait_rollout(&self, env: Environment, timeout: Duration) -> ClusterFuture<'_, ()>;

    /// Observed deployment state, `None` when never deployed.
    fn deployment(&self, env: Environment) -> ClusterFuture<'_, Option<DeploymentRecord>>;

    /// Set the desired replica count.
    fn scale(&self, env: Environment, replicas: u32) -> ClusterFuture<'_, ()>;

    /// Read the main service's selector and its revision.
    fn selector(&self) -> ClusterFuture<'_, SelectorState>;

    /// Point the main service at `target` if the selector is still at
    /// `expected_revision`; `ClusterError::Conflict` otherwise.
    fn swap_selector<'a>(
        &'a self,
        expected_revision: &'a str,
        target: Environment,
    ) -> ClusterFuture<'a, SelectorState>;

    /// `host:port` of the environment's own service.
    fn service_address(&self, env: Environment) -> ClusterFuture<'_, String>;

    /// `host:port` of the main service, where client traffic goes.
    fn main_address(&self) -> ClusterFuture<'_, String>;

    /// The last `limit` selector switches, oldest first. Empty on
    /// backends that keep no history.
    fn switch_history(&self, limit: usize) -> ClusterFuture<'_, Vec<SwitchRecord>>;

    /// Apply the long-lived objects (namespace, services, autoscalers).
    fn bootstrap<'a>(&'a self, manifests: &'a [Manifest]) -> ClusterFuture<'a, ()>;
}

/// Build the backend selected in `config.cluster.backend`.
///
/// `cancel` interrupts rollout waits on backends that poll. kubectl
/// children are killed when their future is dropped instead.
pub fn connect(
    config: &BgConfig,
    cancel: Option<watch::Receiver<bool>>,
) -> ClusterResult<Arc<dyn Cluster>> {
    match config.cluster.backend {
        Backend::Kubectl => Ok(Arc::new(KubectlCluster::new(config))),
        Backend::Local => {
            let cluster = LocalCluster::open(config)?;
            Ok(Arc::new(match cancel {
                Some(cancel) => cluster.with_cancel(cancel),
                None => cluster,
            }))
        }
    }
}
