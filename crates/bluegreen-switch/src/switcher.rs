//! The switch procedure.
//!
//! `Switcher` composes cluster operations into the blue/green steps:
//! find the active environment, deploy to one side, gate it on health,
//! move the main selector, roll back, scale. Every selector write is
//! conditional on the revision read at the start of the step.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use bluegreen_cluster::manifest::{Manifest, render_bootstrap, render_deployment};
use bluegreen_cluster::{Access, Cluster, ClusterError};
use bluegreen_core::{BgConfig, DeploymentRecord, Environment, SelectorState, SwitchRecord};
use bluegreen_health::{GateConfig, HealthVerdict, check_environment, check_routing};

use crate::error::{SwitchError, SwitchResult};
use crate::release::{Release, ReleasePhase};

/// Switches listed by `status`.
const STATUS_HISTORY: usize = 5;

/// Result of a selector switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchOutcome {
    /// Selector value before the switch (`None` when it was unset).
    pub from: Option<Environment>,
    pub to: Environment,
    /// Selector revision after the switch.
    pub revision: String,
    /// `false` when the target was already active and nothing was written.
    pub changed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentStatus {
    pub environment: Environment,
    pub active: bool,
    /// `None` when the environment was never deployed.
    pub deployment: Option<DeploymentRecord>,
}

/// Snapshot printed by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub backend: &'static str,
    pub active: Environment,
    /// Whether the selector key is actually set on the main service.
    pub selector_set: bool,
    pub revision: String,
    pub environments: Vec<EnvironmentStatus>,
    /// Most recent switches, oldest first. Empty on kubectl.
    pub recent_switches: Vec<SwitchRecord>,
}

pub struct Switcher {
    cluster: Arc<dyn Cluster>,
    config: BgConfig,
    gate: GateConfig,
}

impl Switcher {
    pub fn new(cluster: Arc<dyn Cluster>, config: BgConfig) -> Self {
        let gate = GateConfig::from_config(&config.health);
        Self {
            cluster,
            config,
            gate,
        }
    }

    pub fn config(&self) -> &BgConfig {
        &self.config
    }

    /// Check prerequisites for `access` before any mutation.
    pub async fn preflight(&self, access: Access) -> SwitchResult<()> {
        self.cluster.preflight(access).await?;
        Ok(())
    }

    /// The environment the main service currently routes to, blue when
    /// the selector is unset.
    pub async fn get_active(&self) -> SwitchResult<Environment> {
        Ok(self.cluster.selector().await?.active_or_default())
    }

    /// Apply `tag` to `env` and wait for the rollout to complete.
    pub async fn deploy(&self, env: Environment, tag: &str) -> SwitchResult<DeploymentRecord> {
        let image = self.config.image_for(tag)?;

        if let Ok(selector) = self.cluster.selector().await {
            if selector.active == Some(env) {
                warn!(%env, "deploying to the active environment; traffic is served by the new rollout");
            }
        }

        let manifest = render_deployment(&self.config, env, &image, self.config.deploy.replicas);
        info!(%env, %image, replicas = manifest.replicas, "deploying");
        self.cluster.apply_deployment(&manifest).await?;

        let timeout = self.config.rollout_timeout();
        self.cluster.wait_rollout(env, timeout).await?;

        let record = self
            .cluster
            .deployment(env)
            .await?
            .ok_or_else(|| ClusterError::NotFound(self.config.env_resource_name(env)))?;
        info!(%env, %image, ready = record.ready_replicas, "deployment rolled out");
        Ok(record)
    }

    /// Run the health gate against `env`'s own service.
    ///
    /// An unhealthy environment is a normal verdict, not an error; errors
    /// mean the address could not be resolved.
    pub async fn test(&self, env: Environment) -> SwitchResult<HealthVerdict> {
        let address = self.cluster.service_address(env).await?;
        debug!(%env, %address, "testing environment");
        Ok(check_environment(&address, &self.gate).await)
    }

    /// Run the gate through the main service and require the answer to
    /// come from `env`.
    pub async fn verify_traffic(&self, env: Environment) -> SwitchResult<HealthVerdict> {
        let address = self.cluster.main_address().await?;
        debug!(%env, %address, "verifying traffic");
        Ok(check_routing(&address, env, &self.gate).await)
    }

    /// Point the main service at `target`.
    ///
    /// A no-op when `target` is already active. Unless `force` is set,
    /// refuses a target with no ready replicas.
    pub async fn switch(&self, target: Environment, force: bool) -> SwitchResult<SwitchOutcome> {
        let selector = self.cluster.selector().await?;
        self.swap(&selector, target, force).await
    }

    async fn swap(
        &self,
        selector: &SelectorState,
        target: Environment,
        force: bool,
    ) -> SwitchResult<SwitchOutcome> {
        if selector.active == Some(target) {
            info!(%target, revision = %selector.revision, "already active, nothing to switch");
            return Ok(SwitchOutcome {
                from: selector.active,
                to: target,
                revision: selector.revision.clone(),
                changed: false,
            });
        }

        if force {
            warn!(%target, "forced switch, readiness not checked");
        } else {
            let serving = self
                .cluster
                .deployment(target)
                .await?
                .is_some_and(|d| d.is_serving());
            if !serving {
                return Err(SwitchError::NotReady { env: target });
            }
        }

        let next = self
            .cluster
            .swap_selector(&selector.revision, target)
            .await?;
        info!(
            from = ?selector.active,
            to = %target,
            revision = %next.revision,
            "traffic switched"
        );
        Ok(SwitchOutcome {
            from: selector.active,
            to: target,
            revision: next.revision,
            changed: true,
        })
    }

    /// Switch back to the inactive environment, but only if it is
    /// deployed and passes the health gate.
    pub async fn rollback(&self) -> SwitchResult<SwitchOutcome> {
        let selector = self.cluster.selector().await?;
        let active = selector.active_or_default();
        let target = active.other();
        info!(%active, %target, "rolling back");

        if self.cluster.deployment(target).await?.is_none() {
            return Err(SwitchError::RollbackAborted {
                target,
                reason: format!("{target} is not deployed"),
            });
        }

        let verdict = self.test(target).await?;
        if !verdict.healthy {
            return Err(SwitchError::RollbackAborted {
                target,
                reason: verdict.summary(),
            });
        }

        self.swap(&selector, target, false)
            .await
            .map_err(|e| match e {
                SwitchError::NotReady { env } => SwitchError::RollbackAborted {
                    target: env,
                    reason: format!("{env} has no ready replicas"),
                },
                other => other,
            })
    }

    /// Set `env`'s desired replica count.
    pub async fn scale(&self, env: Environment, replicas: u32) -> SwitchResult<()> {
        if replicas == 0 {
            let selector = self.cluster.selector().await?;
            if selector.active_or_default() == env {
                return Err(SwitchError::ActiveScaleDown { env });
            }
        }
        self.cluster.scale(env, replicas).await?;
        Ok(())
    }

    pub async fn status(&self) -> SwitchResult<StatusReport> {
        let selector = self.cluster.selector().await?;
        let active = selector.active_or_default();
        let mut environments = Vec::with_capacity(Environment::ALL.len());
        for env in Environment::ALL {
            environments.push(EnvironmentStatus {
                environment: env,
                active: env == active,
                deployment: self.cluster.deployment(env).await?,
            });
        }
        Ok(StatusReport {
            backend: self.cluster.backend(),
            active,
            selector_set: selector.active.is_some(),
            revision: selector.revision,
            environments,
            recent_switches: self.cluster.switch_history(STATUS_HISTORY).await?,
        })
    }

    /// Deploy `tag` to the inactive environment, gate it, switch, verify,
    /// and shrink the previous environment.
    pub async fn release(&self, tag: &str) -> SwitchResult<Release> {
        let selector = self.cluster.selector().await?;
        let mut release = Release::new(tag, selector.active_or_default());
        let (from, to) = (release.from, release.to);

        release.enter(ReleasePhase::Deploying);
        if let Err(e) = self.deploy(to, tag).await {
            release.abort(e.to_string());
            return Err(e);
        }

        release.enter(ReleasePhase::Testing);
        let verdict = match self.test(to).await {
            Ok(verdict) => verdict,
            Err(e) => {
                release.abort(e.to_string());
                return Err(e);
            }
        };
        if !verdict.healthy {
            let reason = verdict.summary();
            release.abort(reason.clone());
            return Err(SwitchError::Unhealthy { env: to, reason });
        }

        release.enter(ReleasePhase::Switching);
        // Conditional on the selector read before deploying: a concurrent
        // switch during the rollout fails here.
        if let Err(e) = self.swap(&selector, to, false).await {
            release.abort(e.to_string());
            return Err(e);
        }

        if self.config.release.verify_after_switch {
            release.enter(ReleasePhase::Verifying);
            let verdict = match self.verify_traffic(to).await {
                Ok(verdict) => verdict,
                Err(e) => {
                    release.abort(e.to_string());
                    return Err(e);
                }
            };
            if !verdict.healthy {
                let reason = verdict.summary();
                warn!(%to, %reason, "post-switch verification failed, rolling back");
                if let Err(e) = self.rollback().await {
                    release.abort(format!("{reason}; rollback failed: {e}"));
                    return Err(SwitchError::RollbackFailed {
                        tag: tag.to_string(),
                        reason,
                        source: Box::new(e),
                    });
                }
                release.enter(ReleasePhase::RolledBack {
                    reason: reason.clone(),
                });
                return Err(SwitchError::RolledBack {
                    tag: tag.to_string(),
                    restored: from,
                    reason,
                });
            }
        }

        release.enter(ReleasePhase::ScalingDown);
        if self.cluster.deployment(from).await?.is_some() {
            let replicas = self.config.release.scale_down_replicas;
            self.cluster.scale(from, replicas).await?;
            info!(env = %from, replicas, "previous environment scaled down");
        } else {
            debug!(env = %from, "previous environment not deployed, nothing to scale");
        }

        release.enter(ReleasePhase::Completed);
        Ok(release)
    }

    /// Apply the long-lived objects. The main service is rendered with the
    /// current active environment so re-running bootstrap never moves
    /// traffic.
    pub async fn bootstrap(&self) -> SwitchResult<Vec<Manifest>> {
        let active = match self.cluster.selector().await {
            Ok(selector) => selector.active_or_default(),
            Err(ClusterError::NotFound(_)) => Environment::default(),
            Err(e) => return Err(e.into()),
        };
        let manifests = render_bootstrap(&self.config, active);
        self.cluster.bootstrap(&manifests).await?;
        info!(%active, count = manifests.len(), "bootstrap complete");
        Ok(manifests)
    }
}
