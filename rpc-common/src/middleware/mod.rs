//! Tower Middleware Stack
//!
//! Interceptor layers for unary gRPC calls and the two default chains that
//! compose them.

pub mod logging;
pub mod recovery;
pub mod routes;
pub mod stack;
pub mod timeout;

pub use logging::{ClientLoggingLayer, ServerLoggingLayer};
pub use recovery::RecoveryLayer;
pub use routes::ServerChainLayer;
pub use stack::{ClientChain, ServerChain};
pub use timeout::TimeoutLayer;
