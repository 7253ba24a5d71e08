//! Server chain behavior: recovery, timeout and the auth gate working
//! together in front of a handler.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use rpc_common::context::{AUTHORIZATION_KEY, USER_ID_KEY};
use rpc_common::{AuthIdentity, RequestContextExt, ServerChain};
use test_utils::fixtures::{
    GET_USER_METHOD, HEALTH_METHOD, VALID_TOKEN, authenticated_chain, mock_validator,
    sample_claims,
};
use test_utils::mocks::ScriptedHandler;
use tonic::metadata::AsciiMetadataValue;
use tonic::{Code, Request, Response, Status};

fn request_with_token(value: &str) -> Request<String> {
    let mut request = Request::new("payload".to_string());
    request.metadata_mut().insert(
        AUTHORIZATION_KEY,
        AsciiMetadataValue::try_from(value).unwrap(),
    );
    request
}

#[tokio::test]
async fn test_panic_becomes_internal_and_server_keeps_serving() {
    let chain = ServerChain::new(Duration::from_secs(30));
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = tower::service_fn(move |req: Request<String>| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        async move {
            assert!(n > 0, "first call panics");
            Ok::<_, Status>(Response::new(req.into_inner()))
        }
    });

    let status = chain
        .unary("/t.v1.Svc/Boom", Request::new("a".to_string()), handler.clone())
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert_eq!(status.message(), "internal error");

    let ok = chain
        .unary("/t.v1.Svc/Boom", Request::new("b".to_string()), handler)
        .await
        .unwrap();
    assert_eq!(ok.into_inner(), "b");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_panic_while_building_future_is_recovered() {
    let chain = ServerChain::new(Duration::from_secs(30));
    let handler = tower::service_fn(|_req: Request<()>| -> std::future::Ready<Result<Response<()>, Status>> {
        panic!("synchronous panic")
    });

    let status = chain
        .unary("/t.v1.Svc/Sync", Request::new(()), handler)
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
}

#[tokio::test]
async fn test_skip_listed_method_bypasses_auth() {
    let validator = mock_validator();
    let chain = authenticated_chain(validator.clone());
    let handler = tower::service_fn(|req: Request<String>| async move {
        Ok::<_, Status>(Response::new(AuthIdentity::from_request(&req).is_none()))
    });

    let response = chain
        .unary(HEALTH_METHOD, request_with_token("Bearer garbage"), handler)
        .await
        .unwrap();

    assert!(response.into_inner(), "skipped call carries no identity");
    assert_eq!(validator.call_count().await, 0);
}

#[tokio::test]
async fn test_missing_token_never_reaches_handler() {
    let chain = authenticated_chain(mock_validator());
    let handler = ScriptedHandler::succeeding();

    let status = chain
        .unary(GET_USER_METHOD, Request::new("payload".to_string()), handler.clone())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "missing authorization token");
    assert_eq!(handler.calls(), 0);
}

#[tokio::test]
async fn test_invalid_token_is_rejected_without_detail() {
    let validator = mock_validator();
    let chain = authenticated_chain(validator.clone());
    let handler = ScriptedHandler::succeeding();

    let status = chain
        .unary(GET_USER_METHOD, request_with_token("Bearer forged"), handler.clone())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), "invalid token");
    assert_eq!(handler.calls(), 0);
    assert_eq!(validator.seen_tokens().await, vec!["forged".to_string()]);
}

#[tokio::test]
async fn test_bearer_prefix_is_optional() {
    let validator = mock_validator();
    let chain = authenticated_chain(validator.clone());
    let handler = tower::service_fn(|req: Request<String>| async move {
        Ok::<_, Status>(Response::new(AuthIdentity::require(&req).clone()))
    });

    let prefixed = chain
        .unary(
            GET_USER_METHOD,
            request_with_token(&format!("Bearer {VALID_TOKEN}")),
            handler.clone(),
        )
        .await
        .unwrap()
        .into_inner();
    let raw = chain
        .unary(GET_USER_METHOD, request_with_token(VALID_TOKEN), handler)
        .await
        .unwrap()
        .into_inner();

    assert_eq!(prefixed, raw);
    assert_eq!(prefixed, AuthIdentity::from(sample_claims()));
    assert_eq!(
        validator.seen_tokens().await,
        vec![VALID_TOKEN.to_string(), VALID_TOKEN.to_string()]
    );
}

#[tokio::test]
async fn test_prefix_only_token_validates_empty_string() {
    let validator = mock_validator();
    let chain = authenticated_chain(validator.clone());

    let status = chain
        .unary(GET_USER_METHOD, request_with_token("Bearer "), ScriptedHandler::succeeding())
        .await
        .unwrap_err();

    assert_eq!(status.message(), "invalid token");
    assert_eq!(validator.seen_tokens().await, vec![String::new()]);
}

#[tokio::test]
async fn test_verified_identity_is_forwarded_downstream() {
    let chain = authenticated_chain(mock_validator());
    let handler = ScriptedHandler::succeeding();

    chain
        .unary(GET_USER_METHOD, request_with_token(VALID_TOKEN), handler.clone())
        .await
        .unwrap();

    assert_eq!(handler.observed_user_ids(), vec![sample_claims().user_id]);
}

#[tokio::test]
async fn test_authenticated_handler_still_sees_timeout() {
    let chain = authenticated_chain(mock_validator());
    let handler = tower::service_fn(|req: Request<String>| async move {
        let ctx = req.call_context();
        let user = ctx.outgoing_metadata().get(USER_ID_KEY).is_some();
        Ok::<_, Status>(Response::new((ctx.deadline().is_some(), user)))
    });

    let (has_deadline, has_user) = chain
        .unary(GET_USER_METHOD, request_with_token(VALID_TOKEN), handler)
        .await
        .unwrap()
        .into_inner();

    assert!(has_deadline);
    assert!(has_user);
}

#[tokio::test]
async fn test_handler_failure_passes_through_unchanged() {
    let chain = ServerChain::new(Duration::from_secs(30));
    let handler = ScriptedHandler::failing_times(Code::NotFound, 1);

    let status = chain
        .unary("/t.v1.Svc/Get", Request::new(()), handler.clone())
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(handler.calls(), 1);
}
