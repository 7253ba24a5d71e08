//! HS256 token issuing and validation.
//!
//! [`JwtManager`] signs access/refresh token pairs carrying the user id,
//! phone and device id, and implements [`TokenValidator`] so it can back the
//! auth gate directly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::auth::{AuthClaims, TokenValidator};
use crate::config::{self, ConfigError};

/// JWT errors.
#[derive(Error, Debug)]
pub enum JwtError {
    /// No signing secret configured
    #[error("jwt secret key is required")]
    MissingSecret,

    /// Token lifetime cannot be represented
    #[error("token ttl out of range: {0:?}")]
    InvalidTtl(Duration),

    /// Token expired
    #[error("token expired")]
    Expired,

    /// Malformed token, bad signature, or unexpected algorithm
    #[error("invalid token: {0}")]
    Invalid(String),

    /// Signing failed
    #[error("failed to sign token: {0}")]
    Encoding(String),
}

/// Token manager configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct JwtConfig {
    /// HMAC secret
    pub secret_key: String,
    /// Access token lifetime
    pub access_token_ttl: Duration,
    /// Refresh token lifetime
    pub refresh_token_ttl: Duration,
    /// `iss` claim written into every token
    pub issuer: String,
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("secret_key", &"[REDACTED]")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            access_token_ttl: Duration::from_secs(15 * 60),
            refresh_token_ttl: Duration::from_secs(720 * 60 * 60),
            issuer: "cg-platform".to_string(),
        }
    }
}

impl JwtConfig {
    /// Config with `secret_key` and default lifetimes.
    pub fn new(secret_key: impl Into<String>) -> Self {
        Self {
            secret_key: secret_key.into(),
            ..Self::default()
        }
    }

    /// Loads `JWT_SECRET_KEY`, `JWT_ACCESS_TOKEN_TTL_SECS`,
    /// `JWT_REFRESH_TOKEN_TTL_SECS` and `JWT_ISSUER`.
    ///
    /// # Errors
    ///
    /// `MissingRequired` when no secret is set, `ParseError` for bad numbers.
    pub fn from_env() -> Result<Self, ConfigError> {
        config::load_dotenv();
        let defaults = Self::default();

        let secret_key = config::string_env("JWT_SECRET_KEY", "");
        if secret_key.is_empty() {
            return Err(ConfigError::MissingRequired("JWT_SECRET_KEY".to_string()));
        }

        Ok(Self {
            secret_key,
            access_token_ttl: config::parse_secs_env(
                "JWT_ACCESS_TOKEN_TTL_SECS",
                defaults.access_token_ttl,
            )?,
            refresh_token_ttl: config::parse_secs_env(
                "JWT_REFRESH_TOKEN_TTL_SECS",
                defaults.refresh_token_ttl,
            )?,
            issuer: config::string_env("JWT_ISSUER", &defaults.issuer),
        })
    }

    /// Override the access token lifetime.
    #[must_use]
    pub const fn with_access_token_ttl(mut self, ttl: Duration) -> Self {
        self.access_token_ttl = ttl;
        self
    }

    /// Override the refresh token lifetime.
    #[must_use]
    pub const fn with_refresh_token_ttl(mut self, ttl: Duration) -> Self {
        self.refresh_token_ttl = ttl;
        self
    }

    /// Override the issuer.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }
}

/// Claims carried by every token this crate issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub user_id: i64,
    /// Phone number
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phone: String,
    /// Device id
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub device_id: String,
    /// Expiry, seconds since the epoch
    pub exp: i64,
    /// Issued at, seconds since the epoch
    pub iat: i64,
    /// Issuer
    #[serde(default)]
    pub iss: String,
}

impl From<Claims> for AuthClaims {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.user_id,
            phone: claims.phone,
            device_id: claims.device_id,
        }
    }
}

/// Access and refresh tokens issued together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Short-lived token for calls
    pub access_token: String,
    /// Long-lived token for [`JwtManager::refresh`]
    pub refresh_token: String,
    /// Expiry of the access token
    pub expires_at: DateTime<Utc>,
}

/// Issues and validates HS256 tokens.
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
    issuer: String,
}

impl std::fmt::Debug for JwtManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtManager")
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl JwtManager {
    /// Create a manager from `config`.
    ///
    /// # Errors
    ///
    /// `MissingSecret` if the secret is empty.
    pub fn new(config: &JwtConfig) -> Result<Self, JwtError> {
        if config.secret_key.is_empty() {
            return Err(JwtError::MissingSecret);
        }
        let secret = config.secret_key.as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_aud = false;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            access_token_ttl: config.access_token_ttl,
            refresh_token_ttl: config.refresh_token_ttl,
            issuer: config.issuer.clone(),
        })
    }

    /// Issue an access/refresh pair for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if either token cannot be signed.
    pub fn generate_token_pair(
        &self,
        user_id: i64,
        phone: &str,
        device_id: &str,
    ) -> Result<TokenPair, JwtError> {
        let (access_token, expires_at) =
            self.generate_token(user_id, phone, device_id, self.access_token_ttl)?;
        let (refresh_token, _) =
            self.generate_token(user_id, phone, device_id, self.refresh_token_ttl)?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_at,
        })
    }

    /// Issue only an access token. Returns the token and its expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the token cannot be signed.
    pub fn generate_access_token(
        &self,
        user_id: i64,
        phone: &str,
        device_id: &str,
    ) -> Result<(String, DateTime<Utc>), JwtError> {
        self.generate_token(user_id, phone, device_id, self.access_token_ttl)
    }

    fn generate_token(
        &self,
        user_id: i64,
        phone: &str,
        device_id: &str,
        ttl: Duration,
    ) -> Result<(String, DateTime<Utc>), JwtError> {
        let now = Utc::now();
        let expires_at = TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .ok_or(JwtError::InvalidTtl(ttl))?;

        let claims = Claims {
            user_id,
            phone: phone.to_string(),
            device_id: device_id.to_string(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            iss: self.issuer.clone(),
        };

        Ok((self.sign(&claims)?, expires_at))
    }

    fn sign(&self, claims: &Claims) -> Result<String, JwtError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| JwtError::Encoding(e.to_string()))
    }

    /// Verify signature and expiry and return the claims.
    ///
    /// # Errors
    ///
    /// `Expired` for an expired token, `Invalid` for anything else.
    pub fn parse(&self, token: &str) -> Result<Claims, JwtError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e.to_string()),
            })
    }

    /// Validate an access token.
    ///
    /// # Errors
    ///
    /// See [`JwtManager::parse`].
    pub fn validate_access_token(&self, token: &str) -> Result<Claims, JwtError> {
        self.parse(token)
    }

    /// Validate a refresh token.
    ///
    /// # Errors
    ///
    /// See [`JwtManager::parse`].
    pub fn validate_refresh_token(&self, token: &str) -> Result<Claims, JwtError> {
        self.parse(token)
    }

    /// Issue a new pair from a valid refresh token.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the refresh token, or a signing error.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, JwtError> {
        let claims = self.validate_refresh_token(refresh_token)?;
        debug!(user_id = claims.user_id, "refreshing token pair");
        self.generate_token_pair(claims.user_id, &claims.phone, &claims.device_id)
    }
}

#[async_trait]
impl TokenValidator for JwtManager {
    async fn validate(&self, token: &str) -> anyhow::Result<AuthClaims> {
        Ok(self.validate_access_token(token)?.into())
    }
}
