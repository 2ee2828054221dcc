//! The two-step health gate.
//!
//! An environment is healthy only when `GET /health` succeeds and then
//! `GET /api/info` succeeds. The info probe is skipped once the health
//! probe has failed.

use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use bluegreen_core::Environment;
use bluegreen_core::config::HealthConfig;

use crate::checker::{ProbeResult, http_get, http_probe};

/// Paths and timeout used by the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub health_path: String,
    pub info_path: String,
    /// Timeout applied to each probe separately.
    pub timeout: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self::from_config(&HealthConfig::default())
    }
}

impl GateConfig {
    pub fn from_config(config: &HealthConfig) -> Self {
        Self {
            health_path: config.health_path.clone(),
            info_path: config.info_path.clone(),
            timeout: bluegreen_core::parse_duration(&config.timeout)
                .unwrap_or(Duration::from_secs(5)),
        }
    }
}

/// Outcome of one probe in the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub path: String,
    pub result: ProbeResult,
}

/// Verdict for one environment. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthVerdict {
    pub address: String,
    pub healthy: bool,
    pub steps: Vec<StepOutcome>,
}

impl HealthVerdict {
    /// The first failing step, if any.
    pub fn failure(&self) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| !s.result.is_healthy())
    }

    /// One-line summary for logs and errors.
    pub fn summary(&self) -> String {
        match self.failure() {
            Some(step) => format!("{}{} returned {}", self.address, step.path, step.result),
            None => format!("{} passed {} checks", self.address, self.steps.len()),
        }
    }
}

/// Run the health gate against `address`.
pub async fn check_environment(address: &str, config: &GateConfig) -> HealthVerdict {
    run_gate(address, config, None).await
}

/// Run the gate through a routing address such as the main service, and
/// also require `/api/info` to report `expected` as its environment.
///
/// An info body without an `environment` field is accepted.
pub async fn check_routing(
    address: &str,
    expected: Environment,
    config: &GateConfig,
) -> HealthVerdict {
    run_gate(address, config, Some(expected)).await
}

async fn run_gate(address: &str, config: &GateConfig, expected: Option<Environment>) -> HealthVerdict {
    let mut steps = Vec::with_capacity(2);

    let health = http_probe(address, &config.health_path, config.timeout).await;
    steps.push(StepOutcome {
        path: config.health_path.clone(),
        result: health,
    });

    if health.is_healthy() {
        let (mut result, body) = http_get(address, &config.info_path, config.timeout).await;
        if let (Some(expected), ProbeResult::Healthy { status }, Some(body)) =
            (expected, result, body.as_deref())
        {
            if let Some(reported) = reported_environment(body) {
                if reported != expected.as_str() {
                    warn!(%address, %expected, %reported, "traffic reached the wrong environment");
                    result = ProbeResult::Misrouted { status };
                }
            }
        }
        steps.push(StepOutcome {
            path: config.info_path.clone(),
            result,
        });
    }

    let healthy = steps.len() == 2 && steps.iter().all(|s| s.result.is_healthy());
    let verdict = HealthVerdict {
        address: address.to_string(),
        healthy,
        steps,
    };

    if healthy {
        info!(%address, "health gate passed");
    } else {
        warn!(%address, reason = %verdict.summary(), "health gate failed");
    }
    verdict
}

/// The `environment` field of an info response, if it has one.
fn reported_environment(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("environment")?.as_str().map(str::to_string)
}
