//! Tracing subscriber setup shared by every service using this crate.
//!
//! The interceptors only emit `tracing` events; installing a subscriber is
//! left to the binary through [`init_tracing`].

use tracing::info;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config;

/// Tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Service name recorded when tracing starts
    pub service_name: String,
    /// Fallback filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit one JSON object per event
    pub json_output: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "grpc-service".to_string(),
            log_level: "info".to_string(),
            json_output: false,
        }
    }
}

impl TracingConfig {
    /// Reads `SERVICE_NAME`, `LOG_LEVEL` and `LOG_FORMAT` (`json` enables
    /// JSON output).
    #[must_use]
    pub fn from_env() -> Self {
        config::load_dotenv();
        let defaults = Self::default();
        Self {
            service_name: config::string_env("SERVICE_NAME", &defaults.service_name),
            log_level: config::string_env("LOG_LEVEL", &defaults.log_level),
            json_output: config::string_env("LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
        }
    }

    /// Create config with custom service name.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Create config with custom log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable JSON output.
    #[must_use]
    pub const fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &TracingConfig) -> Result<(), TryInitError> {
    let registry = tracing_subscriber::registry().with(config.filter());

    if config.json_output {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?;
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()?;
    }

    info!(service = %config.service_name, json = config.json_output, "tracing initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.service_name, "grpc-service");
        assert_eq!(config.log_level, "info");
        assert!(!config.json_output);
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::default()
            .with_service_name("user-service")
            .with_log_level("rpc_common=debug")
            .with_json_output();

        assert_eq!(config.service_name, "user-service");
        assert_eq!(config.log_level, "rpc_common=debug");
        assert!(config.json_output);
    }

    #[test]
    fn test_second_init_fails() {
        let config = TracingConfig::default();
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
