//! gRPC server bootstrap.
//!
//! [`GrpcServer`] holds the validated [`ServerConfig`] and hands out the
//! pieces a service needs: a transport builder with the global in-flight
//! limit and the server interceptor chain installed, and message size caps
//! for generated services. `serve` runs the router until the shutdown
//! future resolves.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tonic::body::BoxBody;
use tonic::codegen::{Body, Bytes, Service, StdError, http};
use tonic::service::Routes;
use tonic::transport::Server;
use tonic::transport::server::Router;
use tower::Layer;
use tower::layer::util::{Identity, Stack};
use tower::limit::GlobalConcurrencyLimitLayer;
use tracing::info;

use crate::auth::AuthLayer;
use crate::config::{self, ConfigError};
use crate::error::RpcError;
use crate::limits::MessageLimits;
use crate::middleware::{ServerChain, ServerChainLayer};

/// Default maximum message size in either direction (4 MiB).
pub const DEFAULT_MAX_MSG_SIZE: usize = 4 * 1024 * 1024;

/// Transport layers installed by [`GrpcServer::builder`]: the global
/// in-flight limit, then the server interceptor chain.
pub type ServerLayer<A = Identity> =
    Stack<ServerChainLayer<A>, Stack<GlobalConcurrencyLimitLayer, Identity>>;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
    /// Largest inbound message in bytes
    pub max_recv_msg_size: usize,
    /// Largest outbound message in bytes
    pub max_send_msg_size: usize,
    /// Requests in flight across all connections
    pub connection_limit: usize,
    /// Per-call timeout applied by the interceptor chain
    pub timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 50051,
            max_recv_msg_size: DEFAULT_MAX_MSG_SIZE,
            max_send_msg_size: DEFAULT_MAX_MSG_SIZE,
            connection_limit: 1000,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Reads `GRPC_HOST`, `GRPC_PORT`, `GRPC_MAX_RECV_MSG_SIZE`,
    /// `GRPC_MAX_SEND_MSG_SIZE`, `GRPC_CONN_LIMIT` and `GRPC_TIMEOUT_MS`,
    /// falling back to the defaults for unset variables.
    ///
    /// # Errors
    ///
    /// Returns error if a variable fails to parse or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        config::load_dotenv();
        let defaults = Self::default();

        let config = Self {
            host: config::string_env("GRPC_HOST", &defaults.host),
            port: config::parse_env("GRPC_PORT", defaults.port)?,
            max_recv_msg_size: config::parse_env(
                "GRPC_MAX_RECV_MSG_SIZE",
                defaults.max_recv_msg_size,
            )?,
            max_send_msg_size: config::parse_env(
                "GRPC_MAX_SEND_MSG_SIZE",
                defaults.max_send_msg_size,
            )?,
            connection_limit: config::parse_env("GRPC_CONN_LIMIT", defaults.connection_limit)?,
            timeout: config::parse_millis_env("GRPC_TIMEOUT_MS", defaults.timeout)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first field found out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort);
        }
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired("host".to_string()));
        }
        if self.max_recv_msg_size == 0 {
            return Err(ConfigError::must_be_positive("max_recv_msg_size"));
        }
        if self.max_send_msg_size == 0 {
            return Err(ConfigError::must_be_positive("max_send_msg_size"));
        }
        if self.connection_limit == 0 {
            return Err(ConfigError::must_be_positive("connection_limit"));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::must_be_positive("timeout"));
        }
        Ok(())
    }

    /// `host:port`.
    #[must_use]
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The bind address.
    ///
    /// # Errors
    ///
    /// `InvalidAddress` if `host` is not an IP literal.
    pub fn socket_addr(&self) -> Result<SocketAddr, RpcError> {
        let addr = self.addr();
        addr.parse()
            .map_err(|e| RpcError::invalid_address(addr.clone(), e))
    }

    /// Set the bind host.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the bind port.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set both message size caps.
    #[must_use]
    pub const fn with_message_sizes(mut self, max_recv: usize, max_send: usize) -> Self {
        self.max_recv_msg_size = max_recv;
        self.max_send_msg_size = max_send;
        self
    }

    /// Set the in-flight request limit.
    #[must_use]
    pub const fn with_connection_limit(mut self, limit: usize) -> Self {
        self.connection_limit = limit;
        self
    }

    /// Set the per-call timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A configured gRPC server.
#[derive(Debug, Clone)]
pub struct GrpcServer {
    config: ServerConfig,
    addr: SocketAddr,
}

impl GrpcServer {
    /// Validate `config` and resolve the bind address.
    ///
    /// # Errors
    ///
    /// Configuration or address errors.
    pub fn new(config: ServerConfig) -> Result<Self, RpcError> {
        config.validate()?;
        let addr = config.socket_addr()?;
        Ok(Self { config, addr })
    }

    /// The configuration this server was built with.
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The bind address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The default interceptor chain: recovery, logging, timeout.
    ///
    /// Add authentication with [`ServerChain::with_auth`].
    #[must_use]
    pub fn chain(&self) -> ServerChain {
        ServerChain::new(self.config.timeout)
    }

    /// Transport builder running every call through [`Self::chain`],
    /// behind the global in-flight limit.
    #[must_use]
    pub fn builder(&self) -> Server<ServerLayer> {
        self.builder_with(self.chain())
    }

    /// Like [`Self::builder`], with `auth` as the innermost interceptor.
    #[must_use]
    pub fn builder_with_auth(&self, auth: AuthLayer) -> Server<ServerLayer<AuthLayer>> {
        self.builder_with(self.chain().with_auth(auth))
    }

    fn builder_with<A>(&self, chain: ServerChain<A>) -> Server<ServerLayer<A>> {
        Server::builder()
            .layer(GlobalConcurrencyLimitLayer::new(self.config.connection_limit))
            .layer(ServerChainLayer::new(chain))
    }

    /// Apply the configured message size caps to a generated service.
    #[must_use]
    pub fn limit<M: MessageLimits>(&self, service: M) -> M {
        service.with_message_limits(self.config.max_recv_msg_size, self.config.max_send_msg_size)
    }

    /// Serve `router` until `shutdown` resolves, then drain in-flight calls.
    ///
    /// # Errors
    ///
    /// Returns the transport error if binding or serving fails.
    pub async fn serve<L, F, ResBody>(&self, router: Router<L>, shutdown: F) -> Result<(), RpcError>
    where
        F: Future<Output = ()>,
        L: Layer<Routes>,
        L::Service: Service<http::Request<BoxBody>, Response = http::Response<ResBody>>
            + Clone
            + Send
            + 'static,
        <L::Service as Service<http::Request<BoxBody>>>::Future: Send + 'static,
        <L::Service as Service<http::Request<BoxBody>>>::Error: Into<StdError> + Send,
        ResBody: Body<Data = Bytes> + Send + 'static,
        ResBody::Error: Into<StdError>,
    {
        info!(
            addr = %self.addr,
            connection_limit = self.config.connection_limit,
            timeout = ?self.config.timeout,
            "gRPC server starting"
        );

        router.serve_with_shutdown(self.addr, shutdown).await?;

        info!(addr = %self.addr, "gRPC server stopped");
        Ok(())
    }
}
