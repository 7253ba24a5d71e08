//! Server Chain Transport Adapter
//!
//! tonic hands transport layers raw `http::Request`s. [`ServerChainLayer`]
//! lifts each one into a `tonic::Request` whose message is the HTTP request
//! itself, keyed by the `:path` of the call, and runs it through a
//! [`ServerChain`]. The router then receives the request with the chain's
//! extensions merged in, so generated handlers see the same call context,
//! call info and identity as handlers dispatched through
//! [`ServerChain::unary`].
//!
//! Error statuses the router encodes as trailers-only responses are raised
//! back into the chain as `Err`, so logging reports the handler's code.

use std::convert::Infallible;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use tonic::body::BoxBody;
use tonic::codegen::{StdError, http};
use tonic::metadata::MetadataMap;
use tonic::{Code, Extensions, Request, Response, Status};
use tower::layer::util::Identity;
use tower::{Layer, Service, ServiceExt};

use crate::context::CallInfo;
use crate::middleware::stack::ServerChain;

type ChainService<S, A> = <ServerChain<A> as Layer<Dispatch<S>>>::Service;

/// Transport layer running every call through a [`ServerChain`].
#[derive(Debug, Clone)]
pub struct ServerChainLayer<A = Identity> {
    chain: ServerChain<A>,
}

impl<A> ServerChainLayer<A> {
    /// Wrap `chain` for installation with `Server::layer`.
    #[must_use]
    pub const fn new(chain: ServerChain<A>) -> Self {
        Self { chain }
    }

    /// The wrapped chain.
    #[must_use]
    pub const fn chain(&self) -> &ServerChain<A> {
        &self.chain
    }
}

impl<S, A: Clone> Layer<S> for ServerChainLayer<A> {
    type Service = ServerChainService<S, A>;

    fn layer(&self, inner: S) -> Self::Service {
        ServerChainService {
            inner,
            chain: self.chain.clone(),
        }
    }
}

/// Service produced by [`ServerChainLayer`].
#[derive(Debug, Clone)]
pub struct ServerChainService<S, A = Identity> {
    inner: S,
    chain: ServerChain<A>,
}

impl<S, A, B> Service<http::Request<B>> for ServerChainService<S, A>
where
    S: Service<http::Request<B>, Response = http::Response<BoxBody>> + Clone + Send + 'static,
    S::Error: Into<StdError>,
    S::Future: Send + 'static,
    B: Send + 'static,
    ServerChain<A>: Layer<Dispatch<S>>,
    ChainService<S, A>: Service<
            Request<http::Request<B>>,
            Response = Response<http::Response<BoxBody>>,
            Error = Status,
        > + Send
        + 'static,
    <ChainService<S, A> as Service<Request<http::Request<B>>>>::Future: Send + 'static,
{
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Each call drives readiness on its own clone of the router.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<B>) -> Self::Future {
        let info = CallInfo::new(req.uri().path());
        let metadata = MetadataMap::from_headers(req.headers().clone());
        let mut request = Request::from_parts(metadata, Extensions::new(), req);
        request.extensions_mut().insert(info);

        let svc = self.chain.layer(Dispatch::new(self.inner.clone()));

        Box::pin(async move {
            Ok(match svc.oneshot(request).await {
                Ok(response) => response.into_inner(),
                Err(status) => status.into_http(),
            })
        })
    }
}

/// Innermost service of a [`ServerChainService`]: hands the request back
/// to the router.
#[derive(Debug, Clone)]
pub struct Dispatch<S> {
    inner: S,
}

impl<S> Dispatch<S> {
    const fn new(inner: S) -> Self {
        Self { inner }
    }
}

impl<S, B> Service<Request<http::Request<B>>> for Dispatch<S>
where
    S: Service<http::Request<B>, Response = http::Response<BoxBody>> + Clone + Send + 'static,
    S::Error: Into<StdError>,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response<http::Response<BoxBody>>;
    type Error = Status;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner
            .poll_ready(cx)
            .map_err(|e| Status::from_error(e.into()))
    }

    fn call(&mut self, req: Request<http::Request<B>>) -> Self::Future {
        let (_, extensions, mut http_req) = req.into_parts();
        http_req.extensions_mut().extend(extensions);

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let fut = inner.call(http_req);

        Box::pin(async move {
            let response = fut.await.map_err(|e| Status::from_error(e.into()))?;
            match Status::from_header_map(response.headers()) {
                Some(status) if status.code() != Code::Ok => Err(status),
                _ => Ok(Response::new(response)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RequestContextExt;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    type Seen = Arc<Mutex<Vec<(Option<String>, bool)>>>;

    /// Router stand-in: records what a handler would see, then answers
    /// with `status` encoded the way tonic encodes handler errors.
    #[derive(Clone)]
    struct FakeRouter {
        seen: Seen,
        status: Option<Status>,
    }

    impl Service<http::Request<()>> for FakeRouter {
        type Response = http::Response<BoxBody>;
        type Error = Infallible;
        type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: http::Request<()>) -> Self::Future {
            let request = Request::from_http(req);
            self.seen.lock().unwrap().push((
                request
                    .extensions()
                    .get::<CallInfo>()
                    .map(|info| info.full_method().to_string()),
                request.call_context().deadline().is_some(),
            ));
            let response = match self.status.clone() {
                Some(status) => status.into_http(),
                None => http::Response::new(tonic::body::empty_body()),
            };
            Box::pin(async move { Ok(response) })
        }
    }

    fn router(seen: Seen, status: Option<Status>) -> FakeRouter {
        FakeRouter { seen, status }
    }

    fn call_to(path: &str) -> http::Request<()> {
        http::Request::builder()
            .uri(format!("http://localhost{path}"))
            .body(())
            .unwrap()
    }

    #[tokio::test]
    async fn test_router_sees_chain_extensions() {
        let seen: Seen = Arc::default();
        let layer = ServerChainLayer::new(ServerChain::new(Duration::from_secs(30)));
        let svc = layer.layer(router(Arc::clone(&seen), None));

        let response = svc.oneshot(call_to("/user.v1.UserService/GetUser")).await.unwrap();

        assert!(Status::from_header_map(response.headers()).is_none());
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[(Some("/user.v1.UserService/GetUser".to_string()), true)]
        );
    }

    #[tokio::test]
    async fn test_handler_status_survives_the_chain() {
        let layer = ServerChainLayer::new(ServerChain::new(Duration::from_secs(30)));
        let svc = layer.layer(router(Arc::default(), Some(Status::not_found("no such user"))));

        let response = svc.oneshot(call_to("/user.v1.UserService/GetUser")).await.unwrap();

        let status = Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(status.message(), "no such user");
    }

    #[tokio::test]
    async fn test_router_panic_becomes_internal() {
        let layer = ServerChainLayer::new(ServerChain::new(Duration::from_secs(30)));
        let svc = layer.layer(tower::service_fn(|_req: http::Request<()>| async move {
            if true {
                panic!("router exploded");
            }
            Ok::<http::Response<BoxBody>, Infallible>(http::Response::new(
                tonic::body::empty_body(),
            ))
        }));

        let response = svc.oneshot(call_to("/t/Panic")).await.unwrap();

        let status = Status::from_header_map(response.headers()).unwrap();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "internal error");
    }
}
