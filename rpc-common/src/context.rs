//! Request-scoped call context and metadata helpers.
//!
//! A [`CallContext`] travels inside the extensions of every
//! [`tonic::Request`] passing through the interceptor chains. It carries
//! cancellation signals, an optional deadline, and metadata to attach to
//! downstream calls. Contexts are immutable: deriving a child never changes
//! the parent.

use std::future::{self, Future};
use std::time::Duration;

use futures::future::select_all;
use tokio::sync::watch;
use tokio::time::Instant;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::{Extensions, Request, Status};

/// Metadata key carrying the bearer token.
pub const AUTHORIZATION_KEY: &str = "authorization";
/// Metadata key carrying the authenticated user id.
pub const USER_ID_KEY: &str = "x-user-id";
/// Metadata key carrying the request id.
pub const REQUEST_ID_KEY: &str = "x-request-id";

/// Why a call context finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Done {
    /// The context, or one of its ancestors, was cancelled.
    Cancelled,
    /// The context deadline passed.
    DeadlineExceeded,
}

impl Done {
    /// The status reported to callers for this outcome.
    #[must_use]
    pub fn to_status(self) -> Status {
        match self {
            Self::Cancelled => Status::cancelled("context canceled"),
            Self::DeadlineExceeded => Status::deadline_exceeded("context deadline exceeded"),
        }
    }
}

/// Cancellation, deadline and outgoing metadata for a single call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    signals: Vec<watch::Receiver<bool>>,
    deadline: Option<Instant>,
    outgoing: MetadataMap,
}

/// Write side of a derived [`CallContext`].
///
/// Dropping the handle cancels the context it was created with, so a child
/// context never outlives the scope that derived it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel the associated context and every context derived from it.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child context that can be cancelled independently.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let mut child = self.clone();
        child.signals.push(rx);
        (child, CancelHandle { tx })
    }

    /// Derive a child context whose deadline is at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.with_deadline(deadline)
    }

    /// Derive a child context with the earlier of `deadline` and the parent's.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        let (mut child, handle) = self.with_cancel();
        child.deadline = Some(match self.deadline {
            Some(parent) if parent < deadline => parent,
            _ => deadline,
        });
        (child, handle)
    }

    /// Derive a context that appends `value` under `key` to outgoing calls.
    #[must_use]
    pub fn with_outgoing_metadata(&self, key: &'static str, value: AsciiMetadataValue) -> Self {
        let mut child = self.clone();
        child.outgoing.append(key, value);
        child
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Metadata to attach to calls made on behalf of this context.
    #[must_use]
    pub const fn outgoing_metadata(&self) -> &MetadataMap {
        &self.outgoing
    }

    /// Whether this context or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signals.iter().any(|rx| *rx.borrow())
    }

    /// The reason this context is finished, or `None` while it is live.
    #[must_use]
    pub fn err(&self) -> Option<Done> {
        if self.is_cancelled() {
            return Some(Done::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Done::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> Done {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.cancelled() => Done::Cancelled,
                () = tokio::time::sleep_until(deadline) => Done::DeadlineExceeded,
            },
            None => {
                self.cancelled().await;
                Done::Cancelled
            }
        }
    }

    /// Run `fut` unless the context finishes first.
    ///
    /// # Errors
    ///
    /// Returns the future's own error, or a cancelled / deadline exceeded
    /// status when the context wins the race.
    pub async fn run<T, F>(&self, fut: F) -> Result<T, Status>
    where
        F: Future<Output = Result<T, Status>>,
    {
        if let Some(done) = self.err() {
            return Err(done.to_status());
        }
        tokio::select! {
            biased;
            done = self.done() => Err(done.to_status()),
            result = fut => result,
        }
    }

    /// The context stored in `extensions`, or a background context.
    #[must_use]
    pub fn from_extensions(extensions: &Extensions) -> Self {
        extensions.get::<Self>().cloned().unwrap_or_default()
    }

    async fn cancelled(&self) {
        if self.signals.is_empty() {
            return future::pending().await;
        }
        let waits = self
            .signals
            .iter()
            .cloned()
            .map(|rx| Box::pin(wait_for_cancel(rx)));
        select_all(waits).await;
    }
}

async fn wait_for_cancel(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone without an unseen update: only a final `true` counts.
            if *rx.borrow() {
                return;
            }
            return future::pending().await;
        }
    }
}

fn far_future() -> Instant {
    // Roughly 30 years, the same horizon tokio uses for "never".
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

/// Identity of the method a call is addressed to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInfo {
    full_method: String,
}

impl CallInfo {
    /// Create call info for a fully-qualified method, e.g.
    /// `/user.v1.UserService/GetUser`.
    #[must_use]
    pub fn new(full_method: impl Into<String>) -> Self {
        Self {
            full_method: full_method.into(),
        }
    }

    /// The fully-qualified method name.
    #[must_use]
    pub fn full_method(&self) -> &str {
        &self.full_method
    }

    /// The call info stored in `extensions`, or an `unknown` placeholder.
    #[must_use]
    pub fn from_extensions(extensions: &Extensions) -> Self {
        extensions
            .get::<Self>()
            .cloned()
            .unwrap_or_else(|| Self::new("unknown"))
    }
}

/// First value stored under `key`, or an empty string.
#[must_use]
pub fn metadata_value<'a>(metadata: &'a MetadataMap, key: &str) -> &'a str {
    metadata
        .get(key)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

fn leading_int(value: &str) -> Option<i64> {
    let value = value.trim_start();
    let sign = usize::from(value.starts_with(['+', '-']));
    let digits = value[sign..].bytes().take_while(u8::is_ascii_digit).count();
    value[..sign + digits].parse().ok()
}

/// Accessors for the values interceptors attach to a request.
pub trait RequestContextExt {
    /// The call context, or a background context if none was attached.
    fn call_context(&self) -> CallContext;

    /// The call info, or an `unknown` placeholder.
    fn call_info(&self) -> CallInfo;

    /// First metadata value under `key`, or an empty string.
    fn metadata_value(&self, key: &str) -> &str;

    /// User id from the `x-user-id` metadata.
    ///
    /// Reads the leading signed decimal number and ignores what follows it,
    /// so `"17abc"` is 17. Returns 0 when absent or when no number leads.
    fn user_id(&self) -> i64 {
        leading_int(self.metadata_value(USER_ID_KEY)).unwrap_or(0)
    }

    /// Request id from the `x-request-id` metadata; empty when absent.
    fn request_id(&self) -> &str {
        self.metadata_value(REQUEST_ID_KEY)
    }
}

impl<T> RequestContextExt for Request<T> {
    fn call_context(&self) -> CallContext {
        CallContext::from_extensions(self.extensions())
    }

    fn call_info(&self) -> CallInfo {
        CallInfo::from_extensions(self.extensions())
    }

    fn metadata_value(&self, key: &str) -> &str {
        metadata_value(self.metadata(), key)
    }
}
