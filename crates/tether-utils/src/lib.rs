//! # Tether Utilities
//!
//! Shared utilities, logging, config, and helpers for Tether.
//!
//! This crate provides the ambient pieces every Tether crate relies on:
//! `tracing` based logging setup and the environment-driven session
//! configuration.

pub mod config;
pub mod logging;

// Re-export commonly used items for convenience
pub use config::{ConfigError, SessionConfig};
pub use logging::{init_logging, init_logging_with_level, LogFormat, LogLevel, LoggingError, LoggingGuard};
pub use tracing::{debug, error, info, trace, warn};
