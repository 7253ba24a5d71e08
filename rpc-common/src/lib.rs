//! Shared gRPC infrastructure for platform Rust services.
//!
//! This crate provides centralized implementations for:
//! - Server and client bootstrap with default interceptor chains
//! - Panic recovery, request logging and cooperative timeouts
//! - Bearer token authentication with request-scoped identity
//! - Retry with linear backoff for transient failures
//! - Connect to gRPC error code translation
//! - Tracing subscriber initialization

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod client;
pub mod config;
pub mod connect;
pub mod context;
pub mod error;
pub mod jwt;
pub mod limits;
pub mod middleware;
pub mod retry;
pub mod server;
pub mod shutdown;
pub mod telemetry;

pub use auth::{AuthClaims, AuthConfig, AuthGate, AuthIdentity, AuthLayer, TokenValidator};
pub use client::{ClientConfig, GrpcClient};
pub use config::ConfigError;
pub use connect::{ConnectCode, ConnectError, connect_to_grpc_error};
pub use context::{CallContext, CallInfo, CancelHandle, RequestContextExt};
pub use error::RpcError;
pub use jwt::{JwtConfig, JwtError, JwtManager, TokenPair};
pub use limits::MessageLimits;
pub use middleware::{ClientChain, ServerChain, ServerChainLayer};
pub use retry::{RetryConfig, RetryPolicy, is_retryable};
pub use server::{GrpcServer, ServerConfig, ServerLayer};
pub use telemetry::{TracingConfig, init_tracing};
