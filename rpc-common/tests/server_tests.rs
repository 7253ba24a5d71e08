//! Bootstrap tests: serving with shutdown, the installed interceptor chain
//! on served calls, and JWT-backed authentication.

use std::convert::Infallible;
use std::net::TcpListener;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use rpc_common::context::AUTHORIZATION_KEY;
use rpc_common::shutdown;
use rpc_common::{
    AuthConfig, AuthGate, AuthIdentity, AuthLayer, CallContext, ClientConfig, GrpcClient,
    GrpcServer, JwtConfig, JwtManager, ServerChain, ServerConfig,
};
use test_utils::fixtures::{GET_USER_METHOD, HEALTH_METHOD, VALID_TOKEN, auth_config, mock_validator};
use tonic::body::BoxBody;
use tonic::codec::ProstCodec;
use tonic::codegen::{Service, http};
use tonic::metadata::AsciiMetadataValue;
use tonic::server::{Grpc, NamedService, UnaryService};
use tonic::service::RoutesBuilder;
use tonic::{Code, Request, Response, Status};

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

#[tokio::test]
async fn test_serve_stops_on_trigger() {
    let server = GrpcServer::new(
        ServerConfig::default()
            .with_host("127.0.0.1")
            .with_port(free_port()),
    )
    .unwrap();
    let router = server.builder().add_routes(RoutesBuilder::default().routes());
    let (trigger, signal) = shutdown::channel();

    let running = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(router, signal.recv()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    trigger.trigger();

    let result = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}

const WHO_AM_I: &str = "/test.v1.Accounts/WhoAmI";
const EXPLODE: &str = "/test.v1.Accounts/Explode";

/// Hand-written equivalent of a generated service with two unary methods.
#[derive(Clone)]
struct Accounts;

impl NamedService for Accounts {
    const NAME: &'static str = "test.v1.Accounts";
}

/// Answers with the authenticated user id, or 0 when there is none.
struct WhoAmI;

impl UnaryService<()> for WhoAmI {
    type Response = i64;
    type Future = BoxFuture<'static, Result<Response<i64>, Status>>;

    fn call(&mut self, request: Request<()>) -> Self::Future {
        let user_id = AuthIdentity::from_request(&request).map_or(0, |identity| identity.user_id);
        Box::pin(async move { Ok(Response::new(user_id)) })
    }
}

impl Service<http::Request<BoxBody>> for Accounts {
    type Response = http::Response<BoxBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: http::Request<BoxBody>) -> Self::Future {
        Box::pin(async move {
            match req.uri().path() {
                WHO_AM_I => {
                    let mut grpc = Grpc::new(ProstCodec::<i64, ()>::default());
                    Ok(grpc.unary(WhoAmI, req).await)
                }
                EXPLODE => panic!("account ledger corrupted"),
                _ => Ok(Status::unimplemented("").into_http()),
            }
        })
    }
}

fn local_server() -> GrpcServer {
    GrpcServer::new(
        ServerConfig::default()
            .with_host("127.0.0.1")
            .with_port(free_port()),
    )
    .unwrap()
}

fn client_for(server: &GrpcServer) -> GrpcClient {
    let config = ClientConfig::new("127.0.0.1", server.addr().port())
        .with_retries(0, Duration::from_millis(1));
    GrpcClient::connect_lazy(config).unwrap()
}

fn bearer_context() -> CallContext {
    CallContext::background().with_outgoing_metadata(
        AUTHORIZATION_KEY,
        AsciiMetadataValue::try_from(format!("Bearer {VALID_TOKEN}").as_str()).unwrap(),
    )
}

#[tokio::test]
async fn test_served_panic_becomes_internal() {
    let server = local_server();
    let router = server.builder().add_service(Accounts);
    let (trigger, signal) = shutdown::channel();
    let running = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(router, signal.recv()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let client = client_for(&server);
    let ctx = CallContext::background();

    let status = client
        .unary::<(), i64>(&ctx, EXPLODE, ())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "internal error");

    let user_id = client
        .unary::<(), i64>(&ctx, WHO_AM_I, ())
        .await
        .unwrap()
        .into_inner();
    assert_eq!(user_id, 0);

    trigger.trigger();
    running.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_served_calls_pass_auth_gate() {
    let server = local_server();
    let gate = AuthGate::new(mock_validator(), &auth_config());
    let router = server
        .builder_with_auth(AuthLayer::new(gate))
        .add_service(Accounts);
    let (trigger, signal) = shutdown::channel();
    let running = {
        let server = server.clone();
        tokio::spawn(async move { server.serve(router, signal.recv()).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    let client = client_for(&server);

    let status = client
        .unary::<(), i64>(&CallContext::background(), WHO_AM_I, ())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "missing authorization token");

    let user_id = client
        .unary::<(), i64>(&bearer_context(), WHO_AM_I, ())
        .await
        .unwrap()
        .into_inner();
    assert_eq!(user_id, 1001);

    trigger.trigger();
    running.await.unwrap().unwrap();
}

fn jwt_chain(manager: Arc<JwtManager>) -> ServerChain<AuthLayer> {
    let gate = AuthGate::new(manager, &AuthConfig::default().with_skip_method(HEALTH_METHOD));
    ServerChain::new(Duration::from_secs(5)).with_auth(AuthLayer::new(gate))
}

#[tokio::test]
async fn test_jwt_manager_backs_auth_gate() {
    let manager = Arc::new(JwtManager::new(&JwtConfig::new("integration-secret")).unwrap());
    let (token, _) = manager.generate_access_token(77, "+15551234567", "android-9").unwrap();
    let chain = jwt_chain(Arc::clone(&manager));

    let mut request = Request::new(());
    request.metadata_mut().insert(
        AUTHORIZATION_KEY,
        AsciiMetadataValue::try_from(format!("Bearer {token}").as_str()).unwrap(),
    );
    let handler = tower::service_fn(|req: Request<()>| async move {
        Ok::<_, Status>(Response::new(AuthIdentity::require(&req).clone()))
    });

    let identity = chain
        .unary(GET_USER_METHOD, request, handler)
        .await
        .unwrap()
        .into_inner();

    assert_eq!(identity.user_id, 77);
    assert_eq!(identity.phone, "+15551234567");
    assert_eq!(identity.device_id, "android-9");
}

#[tokio::test]
async fn test_token_from_other_issuer_secret_is_rejected() {
    let ours = Arc::new(JwtManager::new(&JwtConfig::new("ours")).unwrap());
    let theirs = JwtManager::new(&JwtConfig::new("theirs")).unwrap();
    let (token, _) = theirs.generate_access_token(1, "", "").unwrap();

    let mut request = Request::new(());
    request.metadata_mut().insert(
        AUTHORIZATION_KEY,
        AsciiMetadataValue::try_from(token.as_str()).unwrap(),
    );
    let handler = tower::service_fn(|_req: Request<()>| async move {
        Ok::<_, Status>(Response::new(()))
    });

    let status = jwt_chain(ours)
        .unary(GET_USER_METHOD, request, handler)
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "invalid token");
}
