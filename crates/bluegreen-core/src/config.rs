//! bluegreen.toml configuration parser.
//!
//! Every section is optional. Missing keys fall back to defaults
//! (namespace `blue-green`, 3 replicas, 300s rollout timeout).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::image::{ImageError, ImageRef};
use crate::types::Environment;

/// Config file looked up in the working directory when none is given.
pub const DEFAULT_CONFIG_FILE: &str = "bluegreen.toml";

/// RFC 1123 label, which is what Kubernetes requires for names and namespaces.
static DNS_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]{0,61}[a-z0-9])?$").expect("valid regex"));

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Image(#[from] ImageError),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BgConfig {
    pub app: AppConfig,
    pub image: ImageConfig,
    pub deploy: DeployConfig,
    pub health: HealthConfig,
    pub release: ReleaseConfig,
    pub autoscaling: AutoscalingConfig,
    pub cluster: ClusterConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub namespace: String,
    /// Port the services listen on.
    pub port: u16,
    /// Port the demo container listens on.
    pub container_port: u16,
    /// Kubernetes type of the main service.
    pub service_type: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "demo-app".to_string(),
            namespace: "blue-green".to_string(),
            port: 80,
            container_port: 3000,
            service_type: "LoadBalancer".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Registry path without a tag.
    pub repository: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            repository: "demo-app".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeployConfig {
    pub replicas: u32,
    pub rollout_timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            rollout_timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub health_path: String,
    pub info_path: String,
    /// Readiness probe path rendered into deployments.
    pub ready_path: String,
    /// Per-probe timeout (e.g. "5s").
    pub timeout: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            health_path: "/health".to_string(),
            info_path: "/api/info".to_string(),
            ready_path: "/ready".to_string(),
            timeout: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseConfig {
    /// Replicas left on the previous environment after a release.
    pub scale_down_replicas: u32,
    /// Re-test the new active environment right after the switch.
    pub verify_after_switch: bool,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            scale_down_replicas: 1,
            verify_after_switch: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscalingConfig {
    /// Render a HorizontalPodAutoscaler per environment. An autoscaler
    /// overrides post-release scale-down, so it is off by default.
    pub enabled: bool,
    pub min_replicas: u32,
    pub max_replicas: u32,
    /// Target average CPU utilization (percent).
    pub cpu_utilization: u32,
}

impl Default for AutoscalingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_replicas: 2,
            max_replicas: 10,
            cpu_utilization: 70,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Kubectl,
    Local,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub backend: Backend,
    /// kubectl binary name or path.
    pub kubectl: String,
    /// kubeconfig context; current context when unset.
    pub context: Option<String>,
    /// Local backend state directory.
    pub data_dir: PathBuf,
    /// Local backend: complete rollouts as soon as they are applied.
    pub auto_ready: bool,
    /// Local backend: `host:port` of each environment's service, keyed by
    /// environment name.
    pub endpoints: BTreeMap<String, String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Kubectl,
            kubectl: "kubectl".to_string(),
            context: None,
            data_dir: PathBuf::from(".bluegreen"),
            auto_ready: true,
            endpoints: BTreeMap::new(),
        }
    }
}

impl BgConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: BgConfig = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit file, or `bluegreen.toml` from the working
    /// directory when present, or the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Path::new(DEFAULT_CONFIG_FILE);
                if default.is_file() {
                    Self::from_file(default)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !DNS_LABEL_RE.is_match(&self.app.name) {
            return Err(ConfigError::Invalid(format!(
                "app.name '{}' is not a valid DNS label",
                self.app.name
            )));
        }
        if !DNS_LABEL_RE.is_match(&self.app.namespace) {
            return Err(ConfigError::Invalid(format!(
                "app.namespace '{}' is not a valid DNS label",
                self.app.namespace
            )));
        }
        // Env-suffixed names must still fit in a label.
        if self.app.name.len() + "-green".len() > 63 {
            return Err(ConfigError::Invalid(format!(
                "app.name '{}' is too long",
                self.app.name
            )));
        }
        if self.app.port == 0 || self.app.container_port == 0 {
            return Err(ConfigError::Invalid("ports must be non-zero".to_string()));
        }
        ImageRef::parse(&self.image.repository)?;
        for key in self.cluster.endpoints.keys() {
            key.parse::<Environment>()
                .map_err(|e| ConfigError::Invalid(format!("cluster.endpoints: {e}")))?;
        }
        if self.deploy.replicas == 0 {
            return Err(ConfigError::Invalid(
                "deploy.replicas must be at least 1".to_string(),
            ));
        }
        if self.deploy.rollout_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "deploy.rollout_timeout_secs must be non-zero".to_string(),
            ));
        }
        for path in [
            &self.health.health_path,
            &self.health.info_path,
            &self.health.ready_path,
        ] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "health path '{path}' must start with '/'"
                )));
            }
        }
        if parse_duration(&self.health.timeout).is_none() {
            return Err(ConfigError::Invalid(format!(
                "health.timeout '{}' is not a duration",
                self.health.timeout
            )));
        }
        if self.release.scale_down_replicas > self.deploy.replicas {
            return Err(ConfigError::Invalid(format!(
                "release.scale_down_replicas ({}) exceeds deploy.replicas ({})",
                self.release.scale_down_replicas, self.deploy.replicas
            )));
        }
        let hpa = &self.autoscaling;
        if hpa.min_replicas == 0 || hpa.min_replicas > hpa.max_replicas {
            return Err(ConfigError::Invalid(format!(
                "autoscaling range {}..={} is invalid",
                hpa.min_replicas, hpa.max_replicas
            )));
        }
        if hpa.cpu_utilization == 0 || hpa.cpu_utilization > 100 {
            return Err(ConfigError::Invalid(format!(
                "autoscaling.cpu_utilization {} is out of range",
                hpa.cpu_utilization
            )));
        }
        Ok(())
    }

    /// Full image reference for a tag of the configured repository.
    pub fn image_for(&self, tag: &str) -> Result<ImageRef, ImageError> {
        ImageRef::parse(&self.image.repository)?.with_tag(tag)
    }

    /// Name of the deployment and service for an environment.
    pub fn env_resource_name(&self, env: Environment) -> String {
        format!("{}-{}", self.app.name, env)
    }

    /// Name of the main (traffic) service.
    pub fn main_service_name(&self) -> &str {
        &self.app.name
    }

    /// Configured local endpoint for an environment.
    pub fn endpoint_for(&self, env: Environment) -> Option<&str> {
        self.cluster
            .endpoints
            .iter()
            .find(|(key, _)| key.parse::<Environment>().ok() == Some(env))
            .map(|(_, addr)| addr.as_str())
    }

    pub fn rollout_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy.rollout_timeout_secs)
    }

    pub fn health_timeout(&self) -> Duration {
        parse_duration(&self.health.timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Parse a duration string like "5s", "500ms", "2m" or plain seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
