//! Call Logging Tower Layers
//!
//! Server and client variants share the same outcome classification: a
//! successful call is logged at debug, anything else at warn with its code
//! and error text.

use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use tonic::{Code, Request, Response, Status};
use tower::{Layer, Service};
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::context::{CallInfo, REQUEST_ID_KEY, metadata_value};

/// Server-side logging layer for Tower
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerLoggingLayer;

impl ServerLoggingLayer {
    /// Creates a new server logging layer
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for ServerLoggingLayer {
    type Service = ServerLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ServerLoggingService { inner }
    }
}

/// Server-side logging service wrapper
#[derive(Debug, Clone)]
pub struct ServerLoggingService<S> {
    inner: S,
}

impl<S, Req, Resp> Service<Request<Req>> for ServerLoggingService<S>
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
        let info = CallInfo::from_extensions(req.extensions());
        let request_id = match metadata_value(req.metadata(), REQUEST_ID_KEY) {
            "" => Uuid::new_v4().to_string(),
            id => id.to_string(),
        };
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let span = info_span!(
            "grpc.request",
            method = %info.full_method(),
            request_id = %request_id,
            otel.kind = "server"
        );

        Box::pin(
            async move {
                let start = Instant::now();
                let result = inner.call(req).await;
                let code = outcome_code(&result);
                let duration = start.elapsed();

                if code == Code::Ok {
                    debug!(method = %info.full_method(), ?duration, "gRPC request");
                } else {
                    warn!(
                        method = %info.full_method(),
                        ?duration,
                        code = ?code,
                        error = %error_text(&result),
                        "gRPC request failed"
                    );
                }

                result
            }
            .instrument(span),
        )
    }
}

/// Client-side logging layer for Tower
#[derive(Debug, Clone)]
pub struct ClientLoggingLayer {
    target: String,
}

impl ClientLoggingLayer {
    /// Creates a client logging layer for calls to `target`
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl<S> Layer<S> for ClientLoggingLayer {
    type Service = ClientLoggingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ClientLoggingService {
            inner,
            target: self.target.clone(),
        }
    }
}

/// Client-side logging service wrapper
#[derive(Debug, Clone)]
pub struct ClientLoggingService<S> {
    inner: S,
    target: String,
}

impl<S, Req, Resp> Service<Request<Req>> for ClientLoggingService<S>
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
        let info = CallInfo::from_extensions(req.extensions());
        let target = self.target.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let start = Instant::now();
            let result = inner.call(req).await;
            let code = outcome_code(&result);
            let duration = start.elapsed();

            if code == Code::Ok {
                debug!(
                    method = %info.full_method(),
                    target = %target,
                    ?duration,
                    "gRPC client call"
                );
            } else {
                warn!(
                    method = %info.full_method(),
                    target = %target,
                    ?duration,
                    code = ?code,
                    error = %error_text(&result),
                    "gRPC client call failed"
                );
            }

            result
        })
    }
}

fn outcome_code<T>(result: &Result<T, Status>) -> Code {
    result.as_ref().map_or_else(Status::code, |_| Code::Ok)
}

fn error_text<T>(result: &Result<T, Status>) -> &str {
    result.as_ref().err().map_or("", Status::message)
}
