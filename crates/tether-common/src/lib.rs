//! Common utilities for tether
//!
//! This crate provides shared functionality used across all tether crates.

pub mod config;
pub mod error;
pub mod error_handling;
pub mod logging;

pub use config::{get_config, set_config, JsonMode, TetherConfig};
pub use error::{Result, TetherError};
pub use logging::init_logging;
