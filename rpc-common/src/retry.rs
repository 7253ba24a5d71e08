//! Retry policy implementation with linear backoff.
//!
//! Calls failing with a transient status code are re-issued up to
//! `max_retries` more times. The wait before retry `n` (1-based) is
//! `base_wait * n`. Any other status is returned to the caller immediately.

use std::future::Future;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use tonic::{Code, Extensions, Request, Response, Status};
use tower::{Layer, Service, ServiceExt};
use tracing::debug;

use crate::context::{CallContext, CallInfo};

/// Status codes worth retrying.
pub const RETRYABLE_CODES: [Code; 4] = [
    Code::Unavailable,
    Code::ResourceExhausted,
    Code::Aborted,
    Code::Internal,
];

/// Check if a status code is transient.
///
/// # Examples
///
/// ```
/// use rpc_common::is_retryable;
/// use tonic::Code;
///
/// assert!(is_retryable(Code::Unavailable));
/// assert!(!is_retryable(Code::InvalidArgument));
/// ```
#[must_use]
pub const fn is_retryable(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable | Code::ResourceExhausted | Code::Aborted | Code::Internal
    )
}

/// Retry policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,
    /// Wait before the first retry; later retries wait a multiple of it
    pub base_wait: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_wait: Duration::from_millis(100),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom max retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Create a new retry config with a custom base wait.
    #[must_use]
    pub const fn with_base_wait(mut self, base_wait: Duration) -> Self {
        self.base_wait = base_wait;
        self
    }
}

/// Retry policy for executing calls with automatic retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration.
    #[must_use]
    pub const fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create a retry policy with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Wait before the retry that follows `attempt` (0-based).
    ///
    /// Grows linearly without a ceiling; saturates only at `Duration::MAX`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.config
            .base_wait
            .saturating_mul(attempt.saturating_add(1))
    }

    /// Check if a failed attempt should be followed by another one.
    #[must_use]
    pub fn should_retry(&self, status: &Status, attempt: u32) -> bool {
        attempt < self.config.max_retries && is_retryable(status.code())
    }

    /// Execute an async call with retries.
    ///
    /// The backoff wait races against `ctx`; if the context finishes first
    /// its cancellation status is returned and no further attempt is made.
    ///
    /// # Errors
    ///
    /// Returns the first non-retryable status, the last status once retries
    /// are exhausted, or the context's cancellation status.
    pub async fn execute<F, Fut, T>(
        &self,
        ctx: &CallContext,
        method: &str,
        mut operation: F,
    ) -> Result<T, Status>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Status>>,
    {
        let mut attempt = 0;
        loop {
            let status = match operation().await {
                Ok(result) => return Ok(result),
                Err(status) => status,
            };
            if !self.should_retry(&status, attempt) {
                return Err(status);
            }

            tokio::select! {
                biased;
                done = ctx.done() => return Err(done.to_status()),
                () = tokio::time::sleep(self.delay_for_attempt(attempt)) => {}
            }

            attempt += 1;
            debug!(
                method = %method,
                attempt = attempt + 1,
                code = ?status.code(),
                "retrying gRPC call"
            );
        }
    }

    /// Get the maximum number of retries.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Client layer re-issuing unary calls that fail transiently.
#[derive(Debug, Clone, Copy)]
pub struct RetryLayer {
    policy: RetryPolicy,
}

impl RetryLayer {
    /// Creates a retry layer with the given policy
    #[must_use]
    pub const fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            policy: self.policy,
        }
    }
}

/// Retry service wrapper
#[derive(Debug, Clone)]
pub struct RetryService<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S, Req, Resp> Service<Request<Req>> for RetryService<S>
where
    S: Service<Request<Req>, Response = Response<Resp>, Error = Status> + Clone + Send + 'static,
    S::Future: Send + 'static,
    Req: Clone + Send + Sync + 'static,
    Resp: Send + 'static,
{
    type Response = Response<Resp>;
    type Error = Status;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Every attempt drives readiness on its own clone of the inner service.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Req>) -> Self::Future {
        let policy = self.policy;
        let inner = self.inner.clone();

        Box::pin(async move {
            let (metadata, extensions, message) = req.into_parts();
            let ctx = CallContext::from_extensions(&extensions);
            let info = CallInfo::from_extensions(&extensions);
            let method = info.full_method().to_string();
            let governing = ctx.clone();

            // Extensions are not cloneable; carry over the two values the
            // chain relies on. The advertised deadline is what is left of
            // the context when the attempt starts.
            let attempt = move || {
                let mut extensions = Extensions::new();
                extensions.insert(ctx.clone());
                extensions.insert(info.clone());
                let mut request =
                    Request::from_parts(metadata.clone(), extensions, message.clone());
                if let Some(remaining) = ctx.remaining() {
                    request.set_timeout(remaining);
                }
                inner.clone().oneshot(request)
            };

            policy.execute(&governing, &method, attempt).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::metadata_value;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_wait, Duration::from_millis(100));
    }

    #[test]
    fn test_delay_grows_linearly() {
        let policy = RetryPolicy::with_defaults();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(99), Duration::from_secs(10));
    }

    #[test]
    fn test_delay_saturates() {
        let policy = RetryPolicy::new(RetryConfig::default().with_base_wait(Duration::MAX));
        assert_eq!(policy.delay_for_attempt(5), Duration::MAX);
    }

    #[test]
    fn test_should_retry() {
        let policy = RetryPolicy::with_defaults();
        let transient = Status::unavailable("down");

        assert!(policy.should_retry(&transient, 0));
        assert!(policy.should_retry(&transient, 2));
        assert!(!policy.should_retry(&transient, 3));
        assert!(!policy.should_retry(&Status::not_found("user"), 0));
    }

    #[test]
    fn test_retryable_codes() {
        for code in RETRYABLE_CODES {
            assert!(is_retryable(code));
        }
        for code in [
            Code::Ok,
            Code::Cancelled,
            Code::Unknown,
            Code::InvalidArgument,
            Code::DeadlineExceeded,
            Code::NotFound,
            Code::AlreadyExists,
            Code::PermissionDenied,
            Code::FailedPrecondition,
            Code::OutOfRange,
            Code::Unimplemented,
            Code::DataLoss,
            Code::Unauthenticated,
        ] {
            assert!(!is_retryable(code), "{code:?}");
        }
    }

    #[tokio::test]
    async fn test_execute_success() {
        let policy = RetryPolicy::with_defaults();
        let result = policy
            .execute(&CallContext::background(), "/t/Ok", || async { Ok(42) })
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_zero_retries_makes_one_attempt() {
        let policy = RetryPolicy::new(RetryConfig::default().with_max_retries(0));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), Status> = policy
            .execute(&CallContext::background(), "/t/Down", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Status::unavailable("down"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), Code::Unavailable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_attempt_advertises_remaining_budget() {
        let (ctx, _release) = CallContext::background().with_timeout(Duration::from_secs(1));
        let seen: Arc<Mutex<Vec<String>>> = Arc::default();
        let recorder = Arc::clone(&seen);
        let policy = RetryPolicy::new(
            RetryConfig::default().with_base_wait(Duration::from_millis(300)),
        );
        let svc = RetryLayer::new(policy).layer(tower::service_fn(move |req: Request<()>| {
            let recorder = Arc::clone(&recorder);
            async move {
                recorder
                    .lock()
                    .unwrap()
                    .push(metadata_value(req.metadata(), "grpc-timeout").to_string());
                Err::<Response<()>, _>(Status::unavailable("down"))
            }
        }));

        let mut request = Request::new(());
        request.set_timeout(Duration::from_secs(1));
        request.extensions_mut().insert(ctx);
        let status = svc.oneshot(request).await.unwrap_err();

        // Attempts start at 0ms, 300ms and 900ms; the wait after the third
        // outlasts the deadline.
        assert_eq!(status.code(), Code::DeadlineExceeded);
        assert_eq!(*seen.lock().unwrap(), ["1000000u", "700000u", "100000u"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_context_skips_backoff() {
        let policy = RetryPolicy::with_defaults();
        let (ctx, handle) = CallContext::background().with_cancel();
        handle.cancel();
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), Status> = policy
            .execute(&ctx, "/t/Down", || {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Status::internal("boom"))
                }
            })
            .await;

        assert_eq!(result.unwrap_err().code(), Code::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
