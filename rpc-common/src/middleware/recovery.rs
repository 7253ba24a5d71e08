//! Panic Recovery Tower Layer
//!
//! Fault boundary around unary call dispatch. A panic raised while building
//! or polling the inner future is caught, logged with the method name, and
//! turned into an `Internal` status. The worker task keeps running.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tonic::{Request, Response, Status};
use tower::{Layer, Service};
use tracing::error;

use crate::context::CallInfo;

/// Message returned to callers in place of the panic payload.
pub const RECOVERED_MESSAGE: &str = "internal error";

/// Recovery layer for Tower
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryLayer;

impl RecoveryLayer {
    /// Creates a new recovery layer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RecoveryLayer {
    type Service = RecoveryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RecoveryService { inner }
    }
}

/// Recovery service wrapper
#[derive(Debug, Clone)]
pub struct RecoveryService<S> {
    inner: S,
}

impl<S, Req, Resp> Service<Request<Req>> for RecoveryService<S>
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

    fn call(&mut self, req: Request<Req>) -> Self::Future {
        let method = CallInfo::from_extensions(req.extensions());
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let fut = match catch_unwind(AssertUnwindSafe(|| inner.call(req))) {
            Ok(fut) => fut,
            Err(payload) => {
                let status = recovered(method.full_method(), payload.as_ref());
                return Box::pin(async move { Err(status) });
            }
        };

        Box::pin(async move {
            match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(recovered(method.full_method(), payload.as_ref())),
            }
        })
    }
}

fn recovered(method: &str, payload: &(dyn Any + Send)) -> Status {
    error!(
        method = %method,
        panic = %panic_message(payload),
        "gRPC panic recovered"
    );
    Status::internal(RECOVERED_MESSAGE)
}

/// Best-effort text of a panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
