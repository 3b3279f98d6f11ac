//! # Session Configuration
//!
//! Timing and transport limits shared by both protocol endpoints.
//!
//! Defaults can be overridden from the environment:
//!
//! | Variable | Meaning | Default |
//! |---|---|---|
//! | `TETHER_POLL_INTERVAL_MS` | how often blocking calls re-check their interrupt flag | `50` |
//! | `TETHER_CONNECT_TIMEOUT_MS` | client connect timeout, `0` waits forever | `5000` |
//! | `TETHER_MAX_FRAME_LEN` | largest accepted protocol frame in bytes | `1048576` |
//! | `TETHER_BIND_HOST` | interface a server listens on when remote clients are allowed | `0.0.0.0` |
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use tether_utils::SessionConfig;
//!
//! let config = SessionConfig::default().with_poll_interval(Duration::from_millis(10));
//! assert_eq!(config.poll_interval, Duration::from_millis(10));
//! ```

use std::env;
use std::time::Duration;

use thiserror::Error;

/// Environment variable for [`SessionConfig::poll_interval`]
pub const POLL_INTERVAL_ENV: &str = "TETHER_POLL_INTERVAL_MS";
/// Environment variable for [`SessionConfig::connect_timeout`]
pub const CONNECT_TIMEOUT_ENV: &str = "TETHER_CONNECT_TIMEOUT_MS";
/// Environment variable for [`SessionConfig::max_frame_len`]
pub const MAX_FRAME_LEN_ENV: &str = "TETHER_MAX_FRAME_LEN";
/// Environment variable for [`SessionConfig::bind_host`]
pub const BIND_HOST_ENV: &str = "TETHER_BIND_HOST";

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError
{
    /// An environment variable holds a value that can't be parsed
    #[error("Invalid value {value:?} for {var}")]
    InvalidValue
    {
        /// Name of the variable
        var: &'static str,
        /// The rejected value
        value: String,
    },
}

/// Timing and size limits for a protocol session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig
{
    /// How long a blocking call waits on the socket before re-checking its
    /// interrupt flag
    pub poll_interval: Duration,
    /// Limit for establishing a client connection; `None` waits forever
    pub connect_timeout: Option<Duration>,
    /// Largest frame accepted from the peer, unless unlimited-length packets
    /// were negotiated
    pub max_frame_len: usize,
    /// Interface a server binds to when remote clients are allowed
    pub bind_host: String,
}

impl Default for SessionConfig
{
    fn default() -> Self
    {
        SessionConfig {
            poll_interval: Duration::from_millis(50),
            connect_timeout: Some(Duration::from_secs(5)),
            max_frame_len: 1 << 20,
            bind_host: "0.0.0.0".to_string(),
        }
    }
}

impl SessionConfig
{
    /// Defaults overridden by any `TETHER_*` variables that are set.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if a variable is set but
    /// malformed.
    pub fn from_env() -> Result<Self, ConfigError>
    {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`SessionConfig::from_env`] but reading variables through
    /// `lookup`.
    ///
    /// ## Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for malformed values.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut config = SessionConfig::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, POLL_INTERVAL_ENV)? {
            config.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, CONNECT_TIMEOUT_ENV)? {
            config.connect_timeout = (ms != 0).then(|| Duration::from_millis(ms));
        }
        if let Some(len) = parse_var::<usize, _>(&lookup, MAX_FRAME_LEN_ENV)? {
            config.max_frame_len = len;
        }
        if let Some(host) = lookup(BIND_HOST_ENV).filter(|h| !h.trim().is_empty()) {
            config.bind_host = host.trim().to_string();
        }
        Ok(config)
    }

    /// Set [`SessionConfig::poll_interval`].
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self
    {
        self.poll_interval = interval;
        self
    }

    /// Set [`SessionConfig::connect_timeout`].
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self
    {
        self.connect_timeout = timeout;
        self
    }

    /// Set [`SessionConfig::max_frame_len`].
    #[must_use]
    pub fn with_max_frame_len(mut self, len: usize) -> Self
    {
        self.max_frame_len = len;
        self
    }

    /// Set [`SessionConfig::bind_host`].
    #[must_use]
    pub fn with_bind_host(mut self, host: impl Into<String>) -> Self
    {
        self.bind_host = host.into();
        self
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&'static str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
