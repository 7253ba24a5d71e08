//! Bootstrap error types.
//!
//! Failures that happen while calls are in flight are always reported as
//! [`tonic::Status`]. This module covers everything around them: loading
//! configuration, binding servers and dialing clients.

use thiserror::Error;

use crate::config::ConfigError;

/// Error raised while setting up or tearing down servers and clients.
#[derive(Error, Debug)]
pub enum RpcError {
    /// Configuration was missing or invalid
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Host and port did not form a valid socket address
    #[error("Invalid address {addr}: {reason}")]
    InvalidAddress {
        /// The address that failed to parse
        addr: String,
        /// Parser error text
        reason: String,
    },

    /// Transport layer failed (bind, dial, serve)
    #[error("gRPC transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// JWT manager setup failed
    #[error("JWT error: {0}")]
    Jwt(#[from] crate::jwt::JwtError),
}

impl RpcError {
    /// Create an invalid address error.
    #[must_use]
    pub fn invalid_address(addr: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidAddress {
            addr: addr.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RpcError::invalid_address("nohost:99999", "invalid port");
        assert_eq!(err.to_string(), "Invalid address nohost:99999: invalid port");

        let err = RpcError::from(ConfigError::InvalidPort);
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid port: must be between 1 and 65535"
        );
    }
}
