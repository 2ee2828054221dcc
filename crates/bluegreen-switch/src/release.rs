//! Release progress tracking.
//!
//! A release walks deploy → test → switch → verify → scale-down. `Release`
//! records where it is and every phase it has passed through.

use serde::Serialize;
use tracing::{info, warn};

use bluegreen_core::Environment;

/// Phase of a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ReleasePhase {
    Pending,
    /// Deploying the new image to the inactive environment.
    Deploying,
    /// Running the health gate against the new environment.
    Testing,
    /// Moving the main selector.
    Switching,
    /// Re-running the health gate after the switch.
    Verifying,
    /// Shrinking the previous environment.
    ScalingDown,
    Completed,
    /// Stopped before the switch; traffic never moved.
    Aborted { reason: String },
    /// Stopped after the switch; traffic was moved back.
    RolledBack { reason: String },
}

impl ReleasePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReleasePhase::Completed
                | ReleasePhase::Aborted { .. }
                | ReleasePhase::RolledBack { .. }
        )
    }
}

/// A release in progress.
#[derive(Debug, Clone, Serialize)]
pub struct Release {
    pub tag: String,
    /// Environment live when the release started.
    pub from: Environment,
    /// Environment receiving the new image.
    pub to: Environment,
    pub phase: ReleasePhase,
    pub history: Vec<ReleasePhase>,
}

impl Release {
    pub fn new(tag: &str, from: Environment) -> Self {
        Self {
            tag: tag.to_string(),
            from,
            to: from.other(),
            phase: ReleasePhase::Pending,
            history: vec![ReleasePhase::Pending],
        }
    }

    /// Move to `phase`. Terminal phases are sticky.
    pub fn enter(&mut self, phase: ReleasePhase) {
        if self.phase.is_terminal() {
            return;
        }
        match &phase {
            ReleasePhase::Aborted { reason } | ReleasePhase::RolledBack { reason } => {
                warn!(tag = %self.tag, from = %self.from, to = %self.to, ?phase, %reason, "release stopped");
            }
            _ => {
                info!(tag = %self.tag, from = %self.from, to = %self.to, ?phase, "release phase");
            }
        }
        self.history.push(phase.clone());
        self.phase = phase;
    }

    pub fn abort(&mut self, reason: impl Into<String>) {
        self.enter(ReleasePhase::Aborted {
            reason: reason.into(),
        });
    }

    /// Whether traffic was moved at any point.
    pub fn switched(&self) -> bool {
        self.history.contains(&ReleasePhase::Switching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn targets_inactive_environment() {
        let release = Release::new("v2", Environment::Green);
        assert_eq!(release.to, Environment::Blue);
        assert_eq!(release.phase, ReleasePhase::Pending);
    }

    #[test]
    fn records_history() {
        let mut release = Release::new("v2", Environment::Blue);
        release.enter(ReleasePhase::Deploying);
        release.enter(ReleasePhase::Testing);
        release.enter(ReleasePhase::Switching);
        release.enter(ReleasePhase::Completed);
        assert_eq!(release.history.len(), 5);
        assert!(release.switched());
        assert!(release.phase.is_terminal());
    }

    #[test]
    fn terminal_phase_is_sticky() {
        let mut release = Release::new("v2", Environment::Blue);
        release.enter(ReleasePhase::Deploying);
        release.abort("rollout timed out");
        release.enter(ReleasePhase::Switching);
        assert!(matches!(release.phase, ReleasePhase::Aborted { .. }));
        assert!(!release.switched());
    }

    #[test]
    fn serializes_with_phase_tag() {
        let mut release = Release::new("v2", Environment::Blue);
        release.abort("health gate failed");
        let json = serde_json::to_value(&release).unwrap();
        assert_eq!(json["phase"]["phase"], "aborted");
        assert_eq!(json["phase"]["reason"], "health gate failed");
        assert_eq!(json["to"], "green");
    }
}
