//! Mock implementations for testing.
//!
//! [`MockValidator`] stands in for a real token validator and records every
//! token it sees. [`ScriptedHandler`] is a unary handler whose outcomes are
//! queued up front.

use std::collections::{HashMap, VecDeque};
use std::future::{Ready, ready};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use rpc_common::{AuthClaims, RequestContextExt, TokenValidator};
use tokio::sync::RwLock;
use tonic::{Code, Request, Response, Status};
use tower::Service;

/// Mock token validator accepting a fixed set of tokens.
#[derive(Debug, Default)]
pub struct MockValidator {
    accepted: HashMap<String, AuthClaims>,
    seen: RwLock<Vec<String>>,
}

impl MockValidator {
    /// Create a validator that rejects everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token`, returning `claims` for it.
    #[must_use]
    pub fn accepting(mut self, token: impl Into<String>, claims: AuthClaims) -> Self {
        self.accepted.insert(token.into(), claims);
        self
    }

    /// Every token passed to `validate`, in order.
    pub async fn seen_tokens(&self) -> Vec<String> {
        self.seen.read().await.clone()
    }

    /// Number of `validate` calls.
    pub async fn call_count(&self) -> usize {
        self.seen.read().await.len()
    }
}

#[async_trait]
impl TokenValidator for MockValidator {
    async fn validate(&self, token: &str) -> anyhow::Result<AuthClaims> {
        self.seen.write().await.push(token.to_string());
        self.accepted
            .get(token)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("token not recognised by mock validator"))
    }
}

/// Unary handler that fails with queued codes, then echoes the request.
///
/// Clones share the queue and counters, so a handler cloned into a service
/// stack can still be inspected afterwards.
#[derive(Debug, Clone, Default)]
pub struct ScriptedHandler {
    script: Arc<Mutex<VecDeque<Code>>>,
    calls: Arc<AtomicUsize>,
    user_ids: Arc<Mutex<Vec<i64>>>,
}

impl ScriptedHandler {
    /// Handler that always succeeds.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::default()
    }

    /// Handler failing once with each code in `codes`, then succeeding.
    #[must_use]
    pub fn failing_with(codes: impl IntoIterator<Item = Code>) -> Self {
        let handler = Self::default();
        handler.lock_script().extend(codes);
        handler
    }

    /// Handler failing `times` times with `code`, then succeeding.
    #[must_use]
    pub fn failing_times(code: Code, times: usize) -> Self {
        Self::failing_with(std::iter::repeat_n(code, times))
    }

    /// Number of times the handler ran.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// The `x-user-id` each invocation observed in its call context's
    /// outgoing metadata.
    #[must_use]
    pub fn observed_user_ids(&self) -> Vec<i64> {
        self.user_ids
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Code>> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<T> Service<Request<T>> for ScriptedHandler {
    type Response = Response<T>;
    type Error = Status;
    type Future = Ready<Result<Response<T>, Status>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<T>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let outgoing = req.call_context();
        let user_id = rpc_common::context::metadata_value(
            outgoing.outgoing_metadata(),
            rpc_common::context::USER_ID_KEY,
        )
        .parse()
        .unwrap_or(0);
        self.user_ids
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(user_id);

        let next = self.lock_script().pop_front();
        ready(match next {
            Some(code) => Err(Status::new(code, format!("scripted {code:?}"))),
            None => Ok(Response::new(req.into_inner())),
        })
    }
}
