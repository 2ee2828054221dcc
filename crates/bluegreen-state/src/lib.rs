//! bluegreen-state — embedded state store for the local cluster backend.
//!
//! Backed by [redb](https://docs.rs/redb), holds what a Kubernetes API
//! server would otherwise own: one deployment record per environment,
//! the main service's environment selector, and the history of switches.
//!
//! # Architecture
//!
//! Values are JSON-serialized into redb's `&[u8]` value columns.
//! Selector updates are conditional on the revision the caller read, and
//! run inside a single write transaction, so two concurrent switches
//! cannot both succeed.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod error;
pub mod store;
pub mod tables;

pub use error::{StateError, StateResult};
pub use store::StateStore;
