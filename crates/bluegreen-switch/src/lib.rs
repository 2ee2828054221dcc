//! bluegreen-switch — the blue/green switch procedure.
//!
//! Two parallel environments, one main service. A release deploys to the
//! inactive side, gates it on health, and moves the main service's
//! environment selector in one conditional write. Rollback moves it back,
//! but only to an environment that passes the same gate.
//!
//! # Components
//!
//! - **`switcher`** — `Switcher`: get_active, deploy, test, switch, rollback, scale, status, release
//! - **`release`** — release phase tracking
//! - **`error`** — `SwitchError`

pub mod error;
pub mod release;
pub mod switcher;

pub use error::{SwitchError, SwitchResult};
pub use release::{Release, ReleasePhase};
pub use switcher::{EnvironmentStatus, StatusReport, SwitchOutcome, Switcher};
