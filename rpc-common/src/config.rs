//! Environment-backed configuration helpers.
//!
//! Each config struct in this crate has a `from_env` loader built on the
//! parsers here. Unset variables fall back to defaults; set but unparsable
//! variables are errors.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid port number
    #[error("Invalid port: must be between 1 and 65535")]
    InvalidPort,

    /// A size or count that must be positive was zero
    #[error("Invalid {field}: must be greater than 0")]
    MustBePositive {
        /// Name of the offending field
        field: &'static str,
    },

    /// Missing required field
    #[error("Missing required configuration: {0}")]
    MissingRequired(String),

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser error text
        reason: String,
    },
}

impl ConfigError {
    /// Create a positivity violation for `field`.
    #[must_use]
    pub const fn must_be_positive(field: &'static str) -> Self {
        Self::MustBePositive { field }
    }
}

/// Load a `.env` file if one is present. Missing files are not an error.
pub(crate) fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Read a string variable with a default.
pub(crate) fn string_env(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable with a default value.
pub(crate) fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.trim().parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a millisecond count into a duration.
pub(crate) fn parse_millis_env(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_env(name, default_ms).map(Duration::from_millis)
}

/// Parse a second count into a duration.
pub(crate) fn parse_secs_env(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    parse_env(name, default.as_secs()).map(Duration::from_secs)
}

/// Parse a comma-separated list, dropping empty entries.
pub(crate) fn parse_list_env(name: &str) -> Vec<String> {
    env::var(name)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_default_when_unset() {
        let port: u16 = parse_env("RPC_COMMON_TEST_UNSET_PORT", 50051).unwrap();
        assert_eq!(port, 50051);
    }

    #[test]
    fn test_parse_millis_default_round_trips() {
        let wait = parse_millis_env("RPC_COMMON_TEST_UNSET_WAIT", Duration::from_millis(100)).unwrap();
        assert_eq!(wait, Duration::from_millis(100));
    }

    #[test]
    fn test_parse_list_env_unset_is_empty() {
        assert!(parse_list_env("RPC_COMMON_TEST_UNSET_LIST").is_empty());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            ConfigError::must_be_positive("max_recv_msg_size").to_string(),
            "Invalid max_recv_msg_size: must be greater than 0"
        );
    }
}
