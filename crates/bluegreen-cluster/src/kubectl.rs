//! `kubectl`-driven backend.
//!
//! Every operation is one `kubectl` invocation against the configured
//! namespace (and context, when set). Manifests go in as JSON on stdin.
//! The selector swap is a merge patch that carries the `resourceVersion`
//! read beforehand, so the API server rejects it with a conflict when
//! someone else changed the service in between.

use std::process::Stdio;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use bluegreen_core::{
    BgConfig, DeploymentRecord, Environment, ImageRef, SELECTOR_KEY, SelectorState, SwitchRecord,
};

use crate::error::{ClusterError, ClusterResult};
use crate::manifest::{DeploymentManifest, Manifest, as_list};
use crate::{Access, Cluster, ClusterFuture};

/// Extra time granted on top of `rollout status --timeout` before the
/// kubectl process itself is abandoned.
const ROLLOUT_GRACE: Duration = Duration::from_secs(30);

/// Captured result of one kubectl invocation.
#[derive(Debug)]
struct CommandOutput {
    command: String,
    success: bool,
    code: i32,
    stdout: String,
    stderr: String,
}

impl CommandOutput {
    fn into_error(self) -> ClusterError {
        ClusterError::Command {
            command: self.command,
            code: self.code,
            stderr: self.stderr.trim().to_string(),
        }
    }
}

pub struct KubectlCluster {
    kubectl: String,
    context: Option<String>,
    namespace: String,
    app: String,
    port: u16,
}

impl KubectlCluster {
    pub fn new(config: &BgConfig) -> Self {
        Self {
            kubectl: config.cluster.kubectl.clone(),
            context: config.cluster.context.clone(),
            namespace: config.app.namespace.clone(),
            app: config.app.name.clone(),
            port: config.app.port,
        }
    }

    fn deployment_name(&self, env: Environment) -> String {
        format!("{}-{}", self.app, env)
    }

    async fn run(&self, args: &[&str], stdin: Option<&[u8]>) -> ClusterResult<CommandOutput> {
        let mut cmd = Command::new(&self.kubectl);
        if let Some(context) = &self.context {
            cmd.arg("--context").arg(context);
        }
        cmd.arg("--namespace")
            .arg(&self.namespace)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let command = format!("{} {}", self.kubectl, args.join(" "));
        debug!(%command, "running kubectl");

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ClusterError::Prerequisite(format!("`{}` not found on PATH", self.kubectl))
            } else {
                ClusterError::Command {
                    command: command.clone(),
                    code: -1,
                    stderr: e.to_string(),
                }
            }
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await.map_err(|e| ClusterError::Command {
                command: command.clone(),
                code: -1,
                stderr: format!("writing stdin: {e}"),
            })?;
            // Close stdin so kubectl sees EOF.
            drop(pipe);
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ClusterError::Command {
                command: command.clone(),
                code: -1,
                stderr: e.to_string(),
            })?;

        Ok(CommandOutput {
            command,
            success: output.status.success(),
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn run_ok(&self, args: &[&str], stdin: Option<&[u8]>) -> ClusterResult<String> {
        let output = self.run(args, stdin).await?;
        if output.success {
            Ok(output.stdout)
        } else {
            Err(output.into_error())
        }
    }

    async fn apply_json(&self, body: &Value) -> ClusterResult<()> {
        let input = serde_json::to_vec(body).map_err(|e| ClusterError::Parse(e.to_string()))?;
        let output = self.run(&["apply", "-f", "-"], Some(&input)).await?;
        if !output.success {
            return Err(ClusterError::Apply(output.stderr.trim().to_string()));
        }
        debug!(stdout = %output.stdout.trim(), "kubectl apply");
        Ok(())
    }
}

impl Cluster for KubectlCluster {
    fn backend(&self) -> &'static str {
        "kubectl"
    }

    fn preflight(&self, access: Access) -> ClusterFuture<'_, ()> {
        Box::pin(async move {
            self.run_ok(&["version", "--client", "-o", "json"], None)
                .await
                .map_err(|e| match e {
                    ClusterError::Prerequisite(_) => e,
                    other => ClusterError::Prerequisite(format!("kubectl is not usable: {other}")),
                })?;

            for &(verb, resource) in access.required() {
                // `auth can-i` exits non-zero for "no" as well as for
                // unreachable clusters; both block the command.
                let output = self.run(&["auth", "can-i", verb, resource], None).await?;
                if !output.success || output.stdout.trim() != "yes" {
                    let detail = if output.stderr.trim().is_empty() {
                        output.stdout.trim().to_string()
                    } else {
                        output.stderr.trim().to_string()
                    };
                    return Err(ClusterError::Prerequisite(format!(
                        "cannot {verb} {resource} in namespace {}: {detail}",
                        self.namespace
                    )));
                }
            }
            debug!(namespace = %self.namespace, ?access, "kubectl preflight passed");
            Ok(())
        })
    }

    fn apply_deployment<'a>(&'a self, manifest: &'a DeploymentManifest) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            self.apply_json(&manifest.manifest.body).await?;
            info!(
                deployment = %manifest.manifest.name,
                image = %manifest.image,
                replicas = manifest.replicas,
                "deployment applied"
            );
            Ok(())
        })
    }

    fn wait_rollout(&self, env: Environment, timeout: Duration) -> ClusterFuture<'_, ()> {
        Box::pin(async move {
            let name = self.deployment_name(env);
            let target = format!("deployment/{name}");
            let flag = format!("--timeout={}s", timeout.as_secs().max(1));

            let output = tokio::time::timeout(
                timeout + ROLLOUT_GRACE,
                self.run(&["rollout", "status", &target, &flag], None),
            )
            .await
            .map_err(|_| ClusterError::RolloutTimeout {
                name: name.clone(),
                timeout,
            })??;

            if output.success {
                return Ok(());
            }
            if is_timeout(&output.stderr) {
                return Err(ClusterError::RolloutTimeout { name, timeout });
            }
            if is_not_found(&output.stderr) {
                return Err(ClusterError::NotFound(format!("deployment {name}")));
            }
            Err(output.into_error())
        })
    }

    fn deployment(&self, env: Environment) -> ClusterFuture<'_, Option<DeploymentRecord>> {
        Box::pin(async move {
            let name = self.deployment_name(env);
            let output = self
                .run(&["get", "deployment", &name, "-o", "json"], None)
                .await?;
            if !output.success {
                if is_not_found(&output.stderr) {
                    return Ok(None);
                }
                return Err(output.into_error());
            }
            let value: Value = serde_json::from_str(&output.stdout)
                .map_err(|e| ClusterError::Parse(format!("deployment {name}: {e}")))?;
            parse_deployment(env, &value).map(Some)
        })
    }

    fn scale(&self, env: Environment, replicas: u32) -> ClusterFuture<'_, ()> {
        Box::pin(async move {
            let name = self.deployment_name(env);
            let target = format!("deployment/{name}");
            let flag = format!("--replicas={replicas}");
            let output = self.run(&["scale", &target, &flag], None).await?;
            if !output.success {
                if is_not_found(&output.stderr) {
                    return Err(ClusterError::NotFound(format!("deployment {name}")));
                }
                return Err(output.into_error());
            }
            info!(deployment = %name, replicas, "deployment scaled");
            Ok(())
        })
    }

    fn selector(&self) -> ClusterFuture<'_, SelectorState> {
        Box::pin(async move {
            let output = self
                .run(&["get", "service", &self.app, "-o", "json"], None)
                .await?;
            if !output.success {
                if is_not_found(&output.stderr) {
                    return Err(ClusterError::NotFound(format!(
                        "service {} in namespace {}",
                        self.app, self.namespace
                    )));
                }
                return Err(output.into_error());
            }
            let value: Value = serde_json::from_str(&output.stdout)
                .map_err(|e| ClusterError::Parse(format!("service {}: {e}", self.app)))?;
            parse_selector(&value)
        })
    }

    fn swap_selector<'a>(
        &'a self,
        expected_revision: &'a str,
        target: Environment,
    ) -> ClusterFuture<'a, SelectorState> {
        Box::pin(async move {
            let patch = selector_patch(expected_revision, target).to_string();
            let output = self
                .run(
                    &[
                        "patch",
                        "service",
                        &self.app,
                        "--type=merge",
                        "-p",
                        &patch,
                        "-o",
                        "json",
                    ],
                    None,
                )
                .await?;

            if !output.success {
                if is_conflict(&output.stderr) {
                    return Err(ClusterError::Conflict {
                        service: self.app.clone(),
                        expected: expected_revision.to_string(),
                    });
                }
                if is_not_found(&output.stderr) {
                    return Err(ClusterError::NotFound(format!("service {}", self.app)));
                }
                return Err(output.into_error());
            }

            let value: Value = serde_json::from_str(&output.stdout)
                .map_err(|e| ClusterError::Parse(format!("patched service: {e}")))?;
            parse_selector(&value)
        })
    }

    fn service_address(&self, env: Environment) -> ClusterFuture<'_, String> {
        Box::pin(async move {
            Ok(format!(
                "{}.{}.svc.cluster.local:{}",
                self.deployment_name(env),
                self.namespace,
                self.port
            ))
        })
    }

    fn main_address(&self) -> ClusterFuture<'_, String> {
        Box::pin(async move {
            Ok(format!(
                "{}.{}.svc.cluster.local:{}",
                self.app, self.namespace, self.port
            ))
        })
    }

    fn switch_history(&self, _limit: usize) -> ClusterFuture<'_, Vec<SwitchRecord>> {
        // The API server keeps only the current selector.
        Box::pin(async move { Ok(Vec::new()) })
    }

    fn bootstrap<'a>(&'a self, manifests: &'a [Manifest]) -> ClusterFuture<'a, ()> {
        Box::pin(async move {
            self.apply_json(&as_list(manifests)).await?;
            info!(count = manifests.len(), namespace = %self.namespace, "bootstrap manifests applied");
            Ok(())
        })
    }
}

/// Merge patch that moves the selector, conditional on `revision`.
pub fn selector_patch(revision: &str, target: Environment) -> Value {
    json!({
        "metadata": { "resourceVersion": revision },
        "spec": { "selector": { SELECTOR_KEY: target.as_str() } },
    })
}

/// Read a `get deployment -o json` document.
pub fn parse_deployment(env: Environment, value: &Value) -> ClusterResult<DeploymentRecord> {
    let image = value["spec"]["template"]["spec"]["containers"][0]["image"]
        .as_str()
        .ok_or_else(|| ClusterError::Parse("deployment has no container image".to_string()))?;
    let image = ImageRef::parse(image)
        .map_err(|e| ClusterError::Parse(format!("deployment image: {e}")))?;

    let replicas = value["spec"]["replicas"].as_u64().unwrap_or(1) as u32;
    // Absent until at least one pod is ready.
    let ready_replicas = value["status"]["readyReplicas"].as_u64().unwrap_or(0) as u32;
    let generation = value["metadata"]["generation"].as_u64().unwrap_or(0);

    let updated_at = value["status"]["conditions"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|c| c["lastUpdateTime"].as_str())
        .chain(value["metadata"]["creationTimestamp"].as_str())
        .filter_map(|ts| chrono::DateTime::parse_from_rfc3339(ts).ok())
        .map(|ts| ts.timestamp().max(0) as u64)
        .max()
        .unwrap_or(0);

    Ok(DeploymentRecord {
        environment: env,
        image,
        replicas,
        ready_replicas,
        generation,
        updated_at,
    })
}

/// Read the environment selector out of a `get service -o json` document.
pub fn parse_selector(value: &Value) -> ClusterResult<SelectorState> {
    let revision = value["metadata"]["resourceVersion"]
        .as_str()
        .ok_or_else(|| ClusterError::Parse("service has no resourceVersion".to_string()))?
        .to_string();

    let active = match value["spec"]["selector"][SELECTOR_KEY].as_str() {
        Some(label) => Some(
            label
                .parse::<Environment>()
                .map_err(|e| ClusterError::Parse(format!("service selector: {e}")))?,
        ),
        None => None,
    };

    Ok(SelectorState { active, revision })
}

fn is_not_found(stderr: &str) -> bool {
    stderr.contains("NotFound") || stderr.contains("not found")
}

fn is_conflict(stderr: &str) -> bool {
    stderr.contains("Conflict") || stderr.contains("the object has been modified")
}

fn is_timeout(stderr: &str) -> bool {
    stderr.contains("timed out") || stderr.contains("exceeded its progress deadline")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deployment_json() -> Value {
        json!({
            "metadata": {
                "name": "demo-app-green",
                "generation": 7,
                "creationTimestamp": "2024-01-01T00:00:00Z",
            },
            "spec": {
                "replicas": 3,
                "template": { "spec": { "containers": [{ "image": "demo-app:v12" }] } },
            },
            "status": {
                "readyReplicas": 2,
                "conditions": [
                    { "type": "Available", "lastUpdateTime": "2024-03-01T12:00:00Z" },
                    { "type": "Progressing", "lastUpdateTime": "2024-03-01T12:05:00Z" },
                ],
            },
        })
    }

    #[test]
    fn parses_deployment() {
        let record = parse_deployment(Environment::Green, &deployment_json()).unwrap();
        assert_eq!(record.image.tag(), "v12");
        assert_eq!(record.replicas, 3);
        assert_eq!(record.ready_replicas, 2);
        assert_eq!(record.generation, 7);
        // Latest condition wins.
        assert_eq!(record.updated_at, 1_709_294_700);
    }

    #[test]
    fn missing_ready_replicas_means_zero() {
        let mut value = deployment_json();
        value["status"] = json!({});
        let record = parse_deployment(Environment::Green, &value).unwrap();
        assert_eq!(record.ready_replicas, 0);
        assert!(!record.is_serving());
        assert_eq!(record.updated_at, 1_704_067_200);
    }

    #[test]
    fn deployment_without_image_is_a_parse_error() {
        let value = json!({ "spec": { "replicas": 1 } });
        assert!(matches!(
            parse_deployment(Environment::Blue, &value),
            Err(ClusterError::Parse(_))
        ));
    }

    #[test]
    fn parses_selector() {
        let value = json!({
            "metadata": { "resourceVersion": "4711" },
            "spec": { "selector": { "app": "demo-app", "environment": "green" } },
        });
        let state = parse_selector(&value).unwrap();
        assert_eq!(state.active, Some(Environment::Green));
        assert_eq!(state.revision, "4711");
    }

    #[test]
    fn unset_selector_key_is_none() {
        let value = json!({
            "metadata": { "resourceVersion": "1" },
            "spec": { "selector": { "app": "demo-app" } },
        });
        let state = parse_selector(&value).unwrap();
        assert_eq!(state.active, None);
        assert_eq!(state.active_or_default(), Environment::Blue);
    }

    #[test]
    fn foreign_selector_value_is_rejected() {
        let value = json!({
            "metadata": { "resourceVersion": "1" },
            "spec": { "selector": { "environment": "canary" } },
        });
        assert!(matches!(parse_selector(&value), Err(ClusterError::Parse(_))));
    }

    #[test]
    fn patch_is_conditional_on_revision() {
        let patch = selector_patch("99", Environment::Blue);
        assert_eq!(patch["metadata"]["resourceVersion"], "99");
        assert_eq!(patch["spec"]["selector"]["environment"], "blue");
    }

    #[test]
    fn classifies_kubectl_errors() {
        assert!(is_not_found(
            r#"Error from server (NotFound): deployments.apps "demo-app-blue" not found"#
        ));
        assert!(is_conflict(
            r#"Error from server (Conflict): Operation cannot be fulfilled on services "demo-app": the object has been modified"#
        ));
        assert!(is_timeout("error: timed out waiting for the condition"));
        assert!(!is_timeout("error: unable to connect"));
    }

    #[tokio::test]
    async fn service_address_uses_cluster_dns() {
        let cluster = KubectlCluster::new(&BgConfig::default());
        let addr = cluster.service_address(Environment::Green).await.unwrap();
        assert_eq!(addr, "demo-app-green.blue-green.svc.cluster.local:80");
        let main = cluster.main_address().await.unwrap();
        assert_eq!(main, "demo-app.blue-green.svc.cluster.local:80");
    }

    #[tokio::test]
    async fn missing_binary_is_a_prerequisite_error() {
        let mut config = BgConfig::default();
        config.cluster.kubectl = "/nonexistent/kubectl".to_string();
        let cluster = KubectlCluster::new(&config);
        assert!(matches!(
            cluster.preflight(Access::Read).await,
            Err(ClusterError::Prerequisite(_))
        ));
    }
}
