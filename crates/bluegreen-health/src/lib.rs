//! bluegreen-health — the health gate in front of every traffic switch.
//!
//! # Architecture
//!
//! ```text
//! check_environment(address)
//!   ├── http_probe(GET /health)     → ProbeResult
//!   └── http_probe(GET /api/info)   → ProbeResult   (only if /health passed)
//!        ↓
//!   HealthVerdict (healthy only if every step returned 2xx)
//!
//! check_routing(main address, expected env)
//!   └── same two steps; /api/info must also name the expected environment
//!
//! poll_until(interval, timeout, cancel, check)
//!   └── bounded wait used for rollouts
//! ```
//!
//! Probes are single-shot: there are no retries and no backoff. A single
//! failed probe fails the whole check.

pub mod checker;
pub mod gate;
pub mod poll;

pub use checker::{ProbeResult, http_get, http_probe};
pub use gate::{GateConfig, HealthVerdict, StepOutcome, check_environment, check_routing};
pub use poll::{PollConfig, PollError, poll_until};
