//! Message size limits for generated servers and clients.
//!
//! tonic applies decode/encode caps per generated service rather than per
//! transport. [`MessageLimits`] gives those types one entry point so the
//! sizes from [`crate::ServerConfig`] and [`crate::ClientConfig`] can be
//! applied uniformly.

/// A gRPC service or client whose message sizes can be capped.
pub trait MessageLimits: Sized {
    /// Cap inbound messages at `max_recv` bytes and outbound at `max_send`.
    #[must_use]
    fn with_message_limits(self, max_recv: usize, max_send: usize) -> Self;
}

/// Implement [`MessageLimits`] for types exposing tonic's
/// `max_decoding_message_size` / `max_encoding_message_size` builders.
///
/// ```ignore
/// rpc_common::impl_message_limits!(
///     UserServiceServer<UserServiceImpl>,
///     UserServiceClient<tonic::transport::Channel>,
/// );
/// ```
#[macro_export]
macro_rules! impl_message_limits {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::limits::MessageLimits for $ty {
                fn with_message_limits(self, max_recv: usize, max_send: usize) -> Self {
                    self.max_decoding_message_size(max_recv)
                        .max_encoding_message_size(max_send)
                }
            }
        )+
    };
}

impl<T> MessageLimits for tonic::client::Grpc<T> {
    fn with_message_limits(self, max_recv: usize, max_send: usize) -> Self {
        self.max_decoding_message_size(max_recv)
            .max_encoding_message_size(max_send)
    }
}
