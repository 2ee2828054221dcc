//! bluegreen-core — types shared by every bluegreen crate.
//!
//! - **`types`** — `Environment`, deployment records, selector state
//! - **`image`** — container image references (`repository:tag`)
//! - **`config`** — `bluegreen.toml` parsing and validation

pub mod config;
pub mod image;
pub mod types;

pub use config::{BgConfig, ConfigError, parse_duration};
pub use image::{ImageError, ImageRef};
pub use types::*;
