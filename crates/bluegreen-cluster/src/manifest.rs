//! Kubernetes manifest rendering.
//!
//! Manifests are rendered as JSON values (`kubectl apply` accepts JSON as
//! well as YAML). Every workload object carries two labels: `app` and the
//! environment selector key. The main service selects on both.

use serde_json::{Value, json};

use bluegreen_core::{APP_LABEL, BgConfig, Environment, ImageRef, SELECTOR_KEY};

/// Kind of a rendered object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestKind {
    Namespace,
    Deployment,
    Service,
    HorizontalPodAutoscaler,
}

impl ManifestKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestKind::Namespace => "Namespace",
            ManifestKind::Deployment => "Deployment",
            ManifestKind::Service => "Service",
            ManifestKind::HorizontalPodAutoscaler => "HorizontalPodAutoscaler",
        }
    }
}

/// One rendered Kubernetes object.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    pub kind: ManifestKind,
    pub name: String,
    pub body: Value,
}

/// A rendered Deployment together with the values it was rendered from.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentManifest {
    pub environment: Environment,
    pub image: ImageRef,
    pub replicas: u32,
    pub manifest: Manifest,
}

fn labels(config: &BgConfig, env: Environment) -> Value {
    json!({
        APP_LABEL: config.app.name,
        SELECTOR_KEY: env.as_str(),
    })
}

pub fn render_namespace(config: &BgConfig) -> Manifest {
    Manifest {
        kind: ManifestKind::Namespace,
        name: config.app.namespace.clone(),
        body: json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": config.app.namespace },
        }),
    }
}

pub fn render_deployment(
    config: &BgConfig,
    env: Environment,
    image: &ImageRef,
    replicas: u32,
) -> DeploymentManifest {
    let name = config.env_resource_name(env);
    let port = config.app.container_port;
    let labels = labels(config, env);

    let body = json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": name,
            "namespace": config.app.namespace,
            "labels": labels,
        },
        "spec": {
            "replicas": replicas,
            "selector": { "matchLabels": labels },
            "template": {
                "metadata": { "labels": labels },
                "spec": {
                    "containers": [{
                        "name": config.app.name,
                        "image": image.to_string(),
                        "ports": [{ "containerPort": port }],
                        "env": [
                            { "name": "ENVIRONMENT", "value": env.as_str() },
                            { "name": "APP_VERSION", "value": image.tag() },
                            { "name": "APP_NAME", "value": config.app.name },
                            { "name": "PORT", "value": port.to_string() },
                        ],
                        "livenessProbe": {
                            "httpGet": { "path": config.health.health_path, "port": port },
                            "initialDelaySeconds": 10,
                            "periodSeconds": 10,
                        },
                        "readinessProbe": {
                            "httpGet": { "path": config.health.ready_path, "port": port },
                            "initialDelaySeconds": 5,
                            "periodSeconds": 5,
                        },
                        "resources": {
                            "requests": { "cpu": "100m", "memory": "128Mi" },
                            "limits": { "cpu": "500m", "memory": "256Mi" },
                        },
                    }],
                },
            },
        },
    });

    DeploymentManifest {
        environment: env,
        image: image.clone(),
        replicas,
        manifest: Manifest {
            kind: ManifestKind::Deployment,
            name,
            body,
        },
    }
}

/// The per-environment service used for pre-switch testing.
pub fn render_env_service(config: &BgConfig, env: Environment) -> Manifest {
    let name = config.env_resource_name(env);
    Manifest {
        kind: ManifestKind::Service,
        name: name.clone(),
        body: json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": name,
                "namespace": config.app.namespace,
                "labels": labels(config, env),
            },
            "spec": {
                "type": "ClusterIP",
                "selector": labels(config, env),
                "ports": [{
                    "port": config.app.port,
                    "targetPort": config.app.container_port,
                    "protocol": "TCP",
                }],
            },
        }),
    }
}

/// The main service. Its selector decides which environment is live.
pub fn render_main_service(config: &BgConfig, active: Environment) -> Manifest {
    let name = config.main_service_name().to_string();
    Manifest {
        kind: ManifestKind::Service,
        name: name.clone(),
        body: json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": name,
                "namespace": config.app.namespace,
                "labels": { APP_LABEL: config.app.name },
            },
            "spec": {
                "type": config.app.service_type,
                "selector": labels(config, active),
                "ports": [{
                    "port": config.app.port,
                    "targetPort": config.app.container_port,
                    "protocol": "TCP",
                }],
            },
        }),
    }
}

pub fn render_autoscaler(config: &BgConfig, env: Environment) -> Manifest {
    let name = config.env_resource_name(env);
    let hpa = &config.autoscaling;
    Manifest {
        kind: ManifestKind::HorizontalPodAutoscaler,
        name: name.clone(),
        body: json!({
            "apiVersion": "autoscaling/v2",
            "kind": "HorizontalPodAutoscaler",
            "metadata": {
                "name": name,
                "namespace": config.app.namespace,
                "labels": labels(config, env),
            },
            "spec": {
                "scaleTargetRef": {
                    "apiVersion": "apps/v1",
                    "kind": "Deployment",
                    "name": name,
                },
                "minReplicas": hpa.min_replicas,
                "maxReplicas": hpa.max_replicas,
                "metrics": [{
                    "type": "Resource",
                    "resource": {
                        "name": "cpu",
                        "target": {
                            "type": "Utilization",
                            "averageUtilization": hpa.cpu_utilization,
                        },
                    },
                }],
            },
        }),
    }
}

/// Everything `bootstrap` applies: namespace, environment services, the
/// main service pointed at `active`, and autoscalers when enabled.
pub fn render_bootstrap(config: &BgConfig, active: Environment) -> Vec<Manifest> {
    let mut manifests = vec![render_namespace(config)];
    for env in Environment::ALL {
        manifests.push(render_env_service(config, env));
    }
    manifests.push(render_main_service(config, active));
    if config.autoscaling.enabled {
        for env in Environment::ALL {
            manifests.push(render_autoscaler(config, env));
        }
    }
    manifests
}

/// Wrap manifests in a `v1/List` so they apply in one call.
pub fn as_list(manifests: &[Manifest]) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "List",
        "items": manifests.iter().map(|m| m.body.clone()).collect::<Vec<_>>(),
    })
}
