//! redb-backed stand-in for a cluster.
//!
//! Deployments and the main service selector live in a `StateStore`.
//! Traffic is not routed anywhere: each environment's "service" is a
//! configured `host:port`, typically a demo service started by hand.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info};

use bluegreen_core::{
    BgConfig, DeploymentRecord, Environment, SelectorState, SwitchRecord, epoch_secs,
};
use bluegreen_health::{PollConfig, PollError, poll_until};
use bluegreen_state::StateStore;

use crate::error::{ClusterError, ClusterResult};
use crate::manifest::{DeploymentManifest, Manifest};
use crate::{Access, Cluster, ClusterFuture};

/// File name of the local cluster database inside `cluster.data_dir`.
pub const STATE_FILE: &str = "cluster.redb";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct LocalCluster {
    store: StateStore,
    service: String,
    names: BTreeMap<Environment, String>,
    endpoints: BTreeMap<Environment, String>,
    auto_ready: bool,
    poll_interval: Duration,
    cancel: Option<watch::Receiver<bool>>,
}

impl LocalCluster {
    /// Open the on-disk store under `cluster.data_dir`.
    pub fn open(config: &BgConfig) -> ClusterResult<Self> {
        let dir = &config.cluster.data_dir;
        std::fs::create_dir_all(dir).map_err(|e| {
            ClusterError::Prerequisite(format!("cannot create {}: {e}", dir.display()))
        })?;
        let store = StateStore::open(&dir.join(STATE_FILE))?;
        Ok(Self::new(store, config))
    }

    pub fn new(store: StateStore, config: &BgConfig) -> Self {
        let names = Environment::ALL
            .into_iter()
            .map(|env| (env, config.env_resource_name(env)))
            .collect();
        let endpoints = Environment::ALL
            .into_iter()
            .filter_map(|env| config.endpoint_for(env).map(|addr| (env, addr.to_string())))
            .collect();
        Self {
            store,
            service: config.main_service_name().to_string(),
            names,
            endpoints,
            auto_ready: config.cluster.auto_ready,
            poll_interval: DEFAULT_POLL_INTERVAL,
            cancel: None,
        }
    }

    /// Stop rollout waits once `cancel` reads `true`.
    pub fn with_cancel(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Report `ready` replicas as passing readiness (capped at desired).
    /// Stands in for pods coming up when `auto_ready` is off.
    pub fn mark_ready(&self, env: Environment, ready: u32) -> ClusterResult<DeploymentRecord> {
        let record = self
            .store
            .update_deployment(self.name(env), |r| r.ready_replicas = ready.min(r.replicas))?;
        Ok(record)
    }

    fn name(&self, env: Environment) -> &str {
        // Filled for both environments in `new`.
        self.names.get(&env).map(String::as_str).unwrap_or_default()
    }
}

impl Cluster for LocalCluster {
    fn backend(&self) -> &'static str {
        "local"
    }

    fn preflight(&self, _access: Access) -> ClusterFuture<'_, ()> {
        Box::pin(async move {
            // No permissions locally. Touch the store so a corrupt
            // database fails here.
            self.store.get_selector(&self.service)?;
            debug!(service = %self.service, "local preflight passed");
            Ok(())
        })
    }

    fn apply_deployment<'a>(&'a self, manifest: &'a DeploymentManifest) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            let name = self.name(manifest.environment);
            let generation = self
                .store
                .get_deployment(name)?
                .map_or(1, |existing| existing.generation + 1);
            let record = DeploymentRecord {
                environment: manifest.environment,
                image: manifest.image.clone(),
                replicas: manifest.replicas,
                ready_replicas: if self.auto_ready { manifest.replicas } else { 0 },
                generation,
                updated_at: epoch_secs(),
            };
            self.store.put_deployment(name, &record)?;
            info!(
                deployment = %name,
                image = %record.image,
                generation,
                "deployment applied"
            );
            Ok(())
        })
    }

    fn wait_rollout(&self, env: Environment, timeout: Duration) -> ClusterFuture<'_, ()> {
        Box::pin(async move {
            let name = self.name(env).to_string();
            let poll = PollConfig::new(self.poll_interval, timeout);

            let result = poll_until(poll, self.cancel.clone(), || {
                let store = self.store.clone();
                let name = name.clone();
                async move {
                    match store.get_deployment(&name).map_err(ClusterError::from)? {
                        Some(record) => Ok(record.is_rolled_out()),
                        None => Err(ClusterError::NotFound(format!("deployment {name}"))),
                    }
                }
            })
            .await;

            match result {
                Ok(()) => Ok(()),
                Err(PollError::TimedOut(_)) => Err(ClusterError::RolloutTimeout { name, timeout }),
                Err(PollError::Cancelled) => Err(ClusterError::Cancelled),
                Err(PollError::Check(e)) => Err(e),
            }
        })
    }

    fn deployment(&self, env: Environment) -> ClusterFuture<'_, Option<DeploymentRecord>> {
        Box::pin(async move { Ok(self.store.get_deployment(self.name(env))?) })
    }

    fn scale(&self, env: Environment, replicas: u32) -> ClusterFuture<'_, ()> {
        Box::pin(async move {
            let auto_ready = self.auto_ready;
            let record = self.store.update_deployment(self.name(env), |r| {
                r.replicas = replicas;
                r.ready_replicas = if auto_ready {
                    replicas
                } else {
                    r.ready_replicas.min(replicas)
                };
            })?;
            info!(deployment = %self.name(env), replicas = record.replicas, "deployment scaled");
            Ok(())
        })
    }

    fn selector(&self) -> ClusterFuture<'_, SelectorState> {
        Box::pin(async move { Ok(self.store.get_selector(&self.service)?) })
    }

    fn swap_selector<'a>(
        &'a self,
        expected_revision: &'a str,
        target: Environment,
    ) -> ClusterFuture<'a, SelectorState> {
        Box::pin(async move {
            Ok(self
                .store
                .swap_selector(&self.service, expected_revision, target)?)
        })
    }

    fn service_address(&self, env: Environment) -> ClusterFuture<'_, String> {
        Box::pin(async move {
            self.endpoints.get(&env).cloned().ok_or_else(|| {
                ClusterError::Prerequisite(format!(
                    "no endpoint for {env} (set cluster.endpoints.{env})"
                ))
            })
        })
    }

    fn main_address(&self) -> ClusterFuture<'_, String> {
        Box::pin(async move {
            // The main service routes to whichever endpoint the selector names.
            let active = self.store.get_selector(&self.service)?.active_or_default();
            self.service_address(active).await
        })
    }

    fn switch_history(&self, limit: usize) -> ClusterFuture<'_, Vec<SwitchRecord>> {
        Box::pin(async move { Ok(self.store.list_switches(&self.service, limit)?) })
    }

    fn bootstrap<'a>(&'a self, manifests: &'a [Manifest]) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            // Services and autoscalers have no local counterpart.
            info!(count = manifests.len(), "local backend: bootstrap manifests skipped");
            Ok(())
        })
    }
}
