//! gRPC client bootstrap.
//!
//! [`GrpcClient`] owns a transport [`Channel`] configured from
//! [`ClientConfig`] and runs unary calls through the default
//! [`ClientChain`] (logging, then retry).

use std::time::Duration;

use tonic::client::Grpc;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::metadata::KeyAndValueRef;
use tonic::transport::{Channel, Endpoint};
use tonic::{Request, Response, Status};
use tower::{Layer, ServiceExt};
use tracing::info;

use crate::config::{self, ConfigError};
use crate::context::{CallContext, CallInfo};
use crate::error::RpcError;
use crate::limits::MessageLimits;
use crate::middleware::ClientChain;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::server::DEFAULT_MAX_MSG_SIZE;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Target host
    pub host: String,
    /// Target port
    pub port: u16,
    /// Default per-request timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base backoff wait
    pub retry_wait: Duration,
    /// Largest inbound message in bytes
    pub max_recv_msg_size: usize,
    /// Largest outbound message in bytes
    pub max_send_msg_size: usize,
    /// HTTP/2 keep-alive ping interval
    pub keep_alive_time: Duration,
    /// How long to wait for a keep-alive ack
    pub keep_alive_timeout: Duration,
    /// Initial HTTP/2 stream window
    pub initial_window_size: u32,
    /// Initial HTTP/2 connection window
    pub initial_conn_window: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 50051,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            retry_wait: Duration::from_millis(100),
            max_recv_msg_size: DEFAULT_MAX_MSG_SIZE,
            max_send_msg_size: DEFAULT_MAX_MSG_SIZE,
            keep_alive_time: Duration::from_secs(30),
            keep_alive_timeout: Duration::from_secs(10),
            initial_window_size: 65_536,
            initial_conn_window: 65_536,
        }
    }
}

impl ClientConfig {
    /// Config targeting `host:port` with default options.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Loads configuration from variables named `{prefix}_HOST`,
    /// `{prefix}_PORT`, `{prefix}_TIMEOUT_MS`, `{prefix}_MAX_RETRIES`,
    /// `{prefix}_RETRY_WAIT_MS`, `{prefix}_MAX_RECV_MSG_SIZE`,
    /// `{prefix}_MAX_SEND_MSG_SIZE`, `{prefix}_KEEPALIVE_TIME_MS`,
    /// `{prefix}_KEEPALIVE_TIMEOUT_MS`, `{prefix}_INITIAL_WINDOW_SIZE` and
    /// `{prefix}_INITIAL_CONN_WINDOW`.
    ///
    /// # Errors
    ///
    /// Returns error if a variable fails to parse or the result is invalid.
    pub fn from_env(prefix: &str) -> Result<Self, ConfigError> {
        config::load_dotenv();
        let d = Self::default();
        let var = |suffix: &str| format!("{prefix}_{suffix}");

        let config = Self {
            host: config::string_env(&var("HOST"), &d.host),
            port: config::parse_env(&var("PORT"), d.port)?,
            timeout: config::parse_millis_env(&var("TIMEOUT_MS"), d.timeout)?,
            max_retries: config::parse_env(&var("MAX_RETRIES"), d.max_retries)?,
            retry_wait: config::parse_millis_env(&var("RETRY_WAIT_MS"), d.retry_wait)?,
            max_recv_msg_size: config::parse_env(&var("MAX_RECV_MSG_SIZE"), d.max_recv_msg_size)?,
            max_send_msg_size: config::parse_env(&var("MAX_SEND_MSG_SIZE"), d.max_send_msg_size)?,
            keep_alive_time: config::parse_millis_env(&var("KEEPALIVE_TIME_MS"), d.keep_alive_time)?,
            keep_alive_timeout: config::parse_millis_env(
                &var("KEEPALIVE_TIMEOUT_MS"),
                d.keep_alive_timeout,
            )?,
            initial_window_size: config::parse_env(
                &var("INITIAL_WINDOW_SIZE"),
                d.initial_window_size,
            )?,
            initial_conn_window: config::parse_env(
                &var("INITIAL_CONN_WINDOW"),
                d.initial_conn_window,
            )?,
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

    /// Retry settings derived from this config.
    #[must_use]
    pub const fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_wait: self.retry_wait,
        }
    }

    /// Set the retry count and base wait.
    #[must_use]
    pub const fn with_retries(mut self, max_retries: u32, retry_wait: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_wait = retry_wait;
        self
    }

    /// Set the default per-request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set both message size caps.
    #[must_use]
    pub const fn with_message_sizes(mut self, max_recv: usize, max_send: usize) -> Self {
        self.max_recv_msg_size = max_recv;
        self.max_send_msg_size = max_send;
        self
    }

    fn endpoint(&self) -> Result<Endpoint, RpcError> {
        let uri = format!("http://{}", self.addr());
        let endpoint = Endpoint::from_shared(uri).map_err(|e| RpcError::invalid_address(self.addr(), e))?;

        Ok(endpoint
            .timeout(self.timeout)
            .http2_keep_alive_interval(self.keep_alive_time)
            .keep_alive_timeout(self.keep_alive_timeout)
            .keep_alive_while_idle(true)
            .initial_stream_window_size(self.initial_window_size)
            .initial_connection_window_size(self.initial_conn_window))
    }
}

/// A connection to one gRPC target with the default client chain.
#[derive(Debug, Clone)]
pub struct GrpcClient {
    config: ClientConfig,
    channel: Channel,
    chain: ClientChain,
}

impl GrpcClient {
    /// Dial the target and wait for the connection.
    ///
    /// # Errors
    ///
    /// Configuration, address, or transport errors.
    pub async fn connect(config: ClientConfig) -> Result<Self, RpcError> {
        config.validate()?;
        let channel = config.endpoint()?.connect().await?;
        info!(addr = %config.addr(), "gRPC client connected");
        Ok(Self::from_channel(config, channel))
    }

    /// Build the client without dialing; the first call connects.
    ///
    /// # Errors
    ///
    /// Configuration or address errors.
    pub fn connect_lazy(config: ClientConfig) -> Result<Self, RpcError> {
        config.validate()?;
        let channel = config.endpoint()?.connect_lazy();
        Ok(Self::from_channel(config, channel))
    }

    fn from_channel(config: ClientConfig, channel: Channel) -> Self {
        let chain = ClientChain::new(config.addr(), RetryPolicy::new(config.retry_config()));
        Self {
            config,
            channel,
            chain,
        }
    }

    /// The underlying channel, for generated clients.
    #[must_use]
    pub fn channel(&self) -> Channel {
        self.channel.clone()
    }

    /// The configuration this client was built with.
    #[must_use]
    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Apply the configured message size caps to a generated client.
    #[must_use]
    pub fn limit<M: MessageLimits>(&self, client: M) -> M {
        client.with_message_limits(self.config.max_recv_msg_size, self.config.max_send_msg_size)
    }

    /// Issue a unary call to `method` (e.g. `/user.v1.UserService/GetUser`).
    ///
    /// The context's outgoing metadata is sent with the request, its
    /// deadline becomes the call timeout, and the call is abandoned if the
    /// context is cancelled.
    ///
    /// # Errors
    ///
    /// The final status after logging and retries.
    pub async fn unary<M1, M2>(
        &self,
        ctx: &CallContext,
        method: &str,
        message: M1,
    ) -> Result<Response<M2>, Status>
    where
        M1: prost::Message + Clone + Send + Sync + 'static,
        M2: prost::Message + Default + Send + Sync + 'static,
    {
        let path = PathAndQuery::try_from(method)
            .map_err(|e| Status::invalid_argument(format!("invalid method {method}: {e}")))?;
        let grpc = self.limit(Grpc::new(self.channel.clone()));

        let invoker = tower::service_fn(move |request: Request<M1>| {
            let mut grpc = grpc.clone();
            let path = path.clone();
            async move {
                grpc.ready()
                    .await
                    .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;
                grpc.unary(request, path, ProstCodec::<M1, M2>::default()).await
            }
        });

        let mut request = Request::new(message);
        attach_outgoing(ctx, &mut request);
        request.extensions_mut().insert(ctx.clone());
        request.extensions_mut().insert(CallInfo::new(method));

        ctx.run(self.chain.layer(invoker).oneshot(request)).await
    }

    /// Drop the connection.
    pub fn close(self) {
        info!(addr = %self.config.addr(), "gRPC client disconnected");
    }
}

/// Copy the context's outgoing metadata onto `request` and bound the call
/// by the context deadline.
fn attach_outgoing<T>(ctx: &CallContext, request: &mut Request<T>) {
    let metadata = request.metadata_mut();
    for entry in ctx.outgoing_metadata().iter() {
        match entry {
            KeyAndValueRef::Ascii(key, value) => {
                metadata.append(key.clone(), value.clone());
            }
            KeyAndValueRef::Binary(key, value) => {
                metadata.append_bin(key.clone(), value.clone());
            }
        }
    }
    if let Some(remaining) = ctx.remaining() {
        request.set_timeout(remaining);
    }
}
