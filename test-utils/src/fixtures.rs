//! Test fixtures with sample data.

use std::sync::Arc;
use std::time::Duration;

use rpc_common::{AuthClaims, AuthConfig, AuthGate, AuthLayer, ServerChain, TokenValidator};

use crate::mocks::MockValidator;

/// Method exempt from authentication in [`auth_config`].
pub const HEALTH_METHOD: &str = "/grpc.health.v1.Health/Check";

/// A method that requires authentication.
pub const GET_USER_METHOD: &str = "/user.v1.UserService/GetUser";

/// Token accepted by [`mock_validator`].
pub const VALID_TOKEN: &str = "valid-token";

/// Claims returned for [`VALID_TOKEN`].
#[must_use]
pub fn sample_claims() -> AuthClaims {
    AuthClaims {
        user_id: 1001,
        phone: "+79990000000".to_string(),
        device_id: "device-abc".to_string(),
    }
}

/// Validator that accepts only [`VALID_TOKEN`].
#[must_use]
pub fn mock_validator() -> Arc<MockValidator> {
    Arc::new(MockValidator::new().accepting(VALID_TOKEN, sample_claims()))
}

/// Auth config skipping [`HEALTH_METHOD`].
#[must_use]
pub fn auth_config() -> AuthConfig {
    AuthConfig::default().with_skip_method(HEALTH_METHOD)
}

/// Server chain with auth backed by `validator`.
#[must_use]
pub fn authenticated_chain(validator: Arc<dyn TokenValidator>) -> ServerChain<AuthLayer> {
    ServerChain::new(Duration::from_secs(30))
        .with_auth(AuthLayer::new(AuthGate::new(validator, &auth_config())))
}
