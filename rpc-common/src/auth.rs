//! Bearer token authentication for unary calls.
//!
//! The [`AuthGate`] reads the `authorization` metadata, validates the token
//! through an injected [`TokenValidator`], and on success attaches an
//! [`AuthIdentity`] to the request extensions. Methods in the skip set pass
//! through without an identity.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tonic::metadata::{AsciiMetadataValue, MetadataMap};
use tonic::{Request, Response, Status};
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::config::{self, ConfigError};
use crate::context::{AUTHORIZATION_KEY, CallContext, CallInfo, USER_ID_KEY, metadata_value};

/// Prefix stripped from the authorization value before validation.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Message returned when no token was presented.
pub const MISSING_TOKEN_MESSAGE: &str = "missing authorization token";

/// Message returned for any validation failure.
pub const INVALID_TOKEN_MESSAGE: &str = "invalid token";

/// Claims a validator extracts from a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthClaims {
    /// Numeric user id
    pub user_id: i64,
    /// Phone number, may be empty
    pub phone: String,
    /// Device id, may be empty
    pub device_id: String,
}

/// Validates bearer tokens.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Validate `token` and return its claims.
    ///
    /// # Errors
    ///
    /// Any failure; the gate reports all of them as `invalid token`.
    async fn validate(&self, token: &str) -> anyhow::Result<AuthClaims>;
}

/// The authenticated caller of a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    /// Numeric user id
    pub user_id: i64,
    /// Phone number
    pub phone: String,
    /// Device id
    pub device_id: String,
}

impl From<AuthClaims> for AuthIdentity {
    fn from(claims: AuthClaims) -> Self {
        Self {
            user_id: claims.user_id,
            phone: claims.phone,
            device_id: claims.device_id,
        }
    }
}

impl AuthIdentity {
    /// The identity attached to `request`, if the gate verified one.
    #[must_use]
    pub fn from_request<T>(request: &Request<T>) -> Option<&Self> {
        request.extensions().get::<Self>()
    }

    /// The identity attached to `request`.
    ///
    /// Only for handlers behind an [`AuthLayer`] on a method outside the
    /// skip set.
    ///
    /// # Panics
    ///
    /// Panics if no identity is attached.
    #[must_use]
    pub fn require<T>(request: &Request<T>) -> &Self {
        match Self::from_request(request) {
            Some(identity) => identity,
            None => panic!("no authenticated identity on request; is the auth layer installed?"),
        }
    }
}

/// Auth gate configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    /// Fully-qualified methods that do not require a token
    pub skip_methods: Vec<String>,
}

impl AuthConfig {
    /// Loads `AUTH_SKIP_METHODS` (comma-separated).
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible like the other loaders.
    pub fn from_env() -> Result<Self, ConfigError> {
        config::load_dotenv();
        Ok(Self {
            skip_methods: config::parse_list_env("AUTH_SKIP_METHODS"),
        })
    }

    /// Add a method to the skip set.
    #[must_use]
    pub fn with_skip_method(mut self, method: impl Into<String>) -> Self {
        self.skip_methods.push(method.into());
        self
    }
}

/// Decision for a call that passed the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Method is exempt; no identity attached.
    Skipped,
    /// Token validated.
    Verified(AuthIdentity),
}

/// Validates tokens and decides whether a call may proceed.
#[derive(Clone)]
pub struct AuthGate {
    validator: Arc<dyn TokenValidator>,
    skip_methods: Arc<HashSet<String>>,
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("skip_methods", &self.skip_methods)
            .finish_non_exhaustive()
    }
}

impl AuthGate {
    /// Create a gate using `validator` and the skip list from `config`.
    pub fn new(validator: Arc<dyn TokenValidator>, config: &AuthConfig) -> Self {
        Self {
            validator,
            skip_methods: Arc::new(config.skip_methods.iter().cloned().collect()),
        }
    }

    /// Whether `method` bypasses authentication.
    #[must_use]
    pub fn is_skipped(&self, method: &str) -> bool {
        self.skip_methods.contains(method)
    }

    /// Run the gate for one call.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` when the token is missing or fails validation.
    pub async fn authenticate(&self, method: &str, metadata: &MetadataMap) -> Result<Verdict, Status> {
        if self.is_skipped(method) {
            debug!(method = %method, "auth skipped");
            return Ok(Verdict::Skipped);
        }

        let raw = metadata_value(metadata, AUTHORIZATION_KEY);
        if raw.is_empty() {
            return Err(Status::unauthenticated(MISSING_TOKEN_MESSAGE));
        }

        match self.validator.validate(extract_token(raw)).await {
            Ok(claims) => Ok(Verdict::Verified(claims.into())),
            Err(err) => {
                warn!(method = %method, error = %err, "token validation failed");
                Err(Status::unauthenticated(INVALID_TOKEN_MESSAGE))
            }
        }
    }
}

/// Strip an exact `"Bearer "` prefix, if present.
#[must_use]
pub fn extract_token(raw: &str) -> &str {
    raw.strip_prefix(BEARER_PREFIX).unwrap_or(raw)
}

/// Attach a verified identity to `request`.
///
/// The identity goes into the request extensions and the user id is added
/// to the outgoing metadata of the request's call context.
pub fn attach_identity<T>(request: &mut Request<T>, identity: AuthIdentity) {
    let ctx = CallContext::from_extensions(request.extensions())
        .with_outgoing_metadata(USER_ID_KEY, AsciiMetadataValue::from(identity.user_id));
    request.extensions_mut().insert(ctx);
    request.extensions_mut().insert(identity);
}

/// Auth layer for Tower
#[derive(Debug, Clone)]
pub struct AuthLayer {
    gate: AuthGate,
}

impl AuthLayer {
    /// Creates a new auth layer around `gate`
    #[must_use]
    pub const fn new(gate: AuthGate) -> Self {
        Self { gate }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            gate: self.gate.clone(),
        }
    }
}

/// Auth service wrapper
#[derive(Debug, Clone)]
pub struct AuthService<S> {
    inner: S,
    gate: AuthGate,
}

impl<S, Req, Resp> Service<Request<Req>> for AuthService<S>
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
        let gate = self.gate.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let info = CallInfo::from_extensions(req.extensions());
            if let Verdict::Verified(identity) =
                gate.authenticate(info.full_method(), req.metadata()).await?
            {
                attach_identity(&mut req, identity);
            }
            inner.call(req).await
        })
    }
}
