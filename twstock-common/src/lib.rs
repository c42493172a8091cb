//! twstock-common - Shared types, utilities, and configuration for the Taiwan stock screener.
//!
//! This crate provides:
//! - Configuration types and loading (`config.json` + `api_config.json`)
//! - Configuration validation
//! - Error types and handling utilities
//! - Logging setup (console and optional log file)
//! - Small string helpers used by the console output

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod config_loader;
pub mod error;
pub mod logging;
pub mod util;
pub mod validation;

pub use config::{
    Config, FetchConfig, FinMindConfig, ObservabilityConfig, OutputConfig, TwseConfig,
};
pub use error::{Error, Result};
pub use validation::{Validate, ValidationError, ValidationResult};

/// Re-export commonly used types for convenience
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::logging::init_logging;
    pub use crate::validation::{Validate, ValidationError};
}
