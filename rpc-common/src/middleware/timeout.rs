//! Timeout Tower Layer
//!
//! Gives every call a child [`CallContext`] bounded by the configured
//! duration. Handlers observe the deadline themselves through the context;
//! the layer never drops the inner future early. The child context is
//! cancelled as soon as the call returns.

use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use tonic::{Request, Response, Status};
use tower::{Layer, Service};

use crate::context::CallContext;

/// Timeout layer for Tower
#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    duration: Duration,
}

impl TimeoutLayer {
    /// Creates a new timeout layer with the given duration
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Creates a new timeout layer from seconds
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// The configured bound.
    #[must_use]
    pub const fn duration(&self) -> Duration {
        self.duration
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            duration: self.duration,
        }
    }
}

/// Timeout service wrapper
#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    duration: Duration,
}

impl<S, Req, Resp> Service<Request<Req>> for TimeoutService<S>
where
    S: Service<Request<Req>, Response = Response<Resp>, Error = Status> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Response = Response<Resp>;
    type Error = Status;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Req>) -> Self::Future {
        let parent = CallContext::from_extensions(req.extensions());
        let (ctx, release) = parent.with_timeout(self.duration);
        req.extensions_mut().insert(ctx);

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let fut = inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            drop(release);
            result
        })
    }
}
