//! Service Stack Builder
//!
//! Composes middleware layers in the correct order.

use std::time::Duration;

use tonic::{Request, Response, Status};
use tower::layer::util::Identity;
use tower::{Layer, Service, ServiceBuilder, ServiceExt};

use crate::auth::AuthLayer;
use crate::context::CallInfo;
use crate::middleware::logging::{
    ClientLoggingLayer, ClientLoggingService, ServerLoggingLayer, ServerLoggingService,
};
use crate::middleware::recovery::{RecoveryLayer, RecoveryService};
use crate::middleware::timeout::{TimeoutLayer, TimeoutService};
use crate::retry::{RetryLayer, RetryPolicy, RetryService};

/// Default server interceptor chain.
///
/// Layer order (outermost to innermost):
/// 1. Recovery - turns handler panics into `Internal`
/// 2. Logging - one span and one outcome line per call
/// 3. Timeout - bounds the call context
/// 4. Auth - only after [`ServerChain::with_auth`]
/// 5. Inner Service - actual request handler
#[derive(Debug, Clone)]
pub struct ServerChain<A = Identity> {
    timeout: Duration,
    auth: A,
}

impl ServerChain {
    /// Chain without authentication.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            auth: Identity::new(),
        }
    }

    /// Append the auth gate as the innermost interceptor.
    #[must_use]
    pub fn with_auth(self, auth: AuthLayer) -> ServerChain<AuthLayer> {
        ServerChain {
            timeout: self.timeout,
            auth,
        }
    }
}

impl<A> ServerChain<A> {
    /// Per-call timeout applied by the chain.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one unary call addressed to `method` through the chain.
    ///
    /// # Errors
    ///
    /// Whatever status the chain or the handler produces.
    pub async fn unary<S, Req, Resp>(
        &self,
        method: &str,
        mut request: Request<Req>,
        handler: S,
    ) -> Result<Response<Resp>, Status>
    where
        Self: Layer<S>,
        <Self as Layer<S>>::Service: Service<Request<Req>, Response = Response<Resp>, Error = Status>,
    {
        request.extensions_mut().insert(CallInfo::new(method));
        self.layer(handler).oneshot(request).await
    }
}

impl<S, A> Layer<S> for ServerChain<A>
where
    A: Layer<S> + Clone,
{
    type Service = RecoveryService<ServerLoggingService<TimeoutService<A::Service>>>;

    fn layer(&self, inner: S) -> Self::Service {
        ServiceBuilder::new()
            .layer(RecoveryLayer::new())
            .layer(ServerLoggingLayer::new())
            .layer(TimeoutLayer::new(self.timeout))
            .layer(self.auth.clone())
            .service(inner)
    }
}

/// Default client interceptor chain: logging, then retry.
#[derive(Debug, Clone)]
pub struct ClientChain {
    target: String,
    retry: RetryPolicy,
}

impl ClientChain {
    /// Chain for calls to `target` using `retry`.
    pub fn new(target: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            target: target.into(),
            retry,
        }
    }

    /// Address the logging layer reports.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Retry policy applied to each call.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }
}

impl<S> Layer<S> for ClientChain {
    type Service = ClientLoggingService<RetryService<S>>;

    fn layer(&self, inner: S) -> Self::Service {
        ServiceBuilder::new()
            .layer(ClientLoggingLayer::new(self.target.clone()))
            .layer(RetryLayer::new(self.retry))
            .service(inner)
    }
}
