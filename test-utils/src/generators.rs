//! Shared proptest generators.

use proptest::prelude::*;
use proptest::sample::select;
use rpc_common::ConnectCode;
use rpc_common::retry::RETRYABLE_CODES;
use tonic::Code;

/// Every gRPC status code.
pub const ALL_GRPC_CODES: [Code; 17] = [
    Code::Ok,
    Code::Cancelled,
    Code::Unknown,
    Code::InvalidArgument,
    Code::DeadlineExceeded,
    Code::NotFound,
    Code::AlreadyExists,
    Code::PermissionDenied,
    Code::ResourceExhausted,
    Code::FailedPrecondition,
    Code::Aborted,
    Code::OutOfRange,
    Code::Unimplemented,
    Code::Internal,
    Code::Unavailable,
    Code::DataLoss,
    Code::Unauthenticated,
];

/// Connect codes without an entry in the bridge table.
pub const UNMAPPED_CONNECT_CODES: [ConnectCode; 3] = [
    ConnectCode::Canceled,
    ConnectCode::Unknown,
    ConnectCode::DeadlineExceeded,
];

/// Any Connect code.
pub fn connect_code_strategy() -> impl Strategy<Value = ConnectCode> {
    select(ConnectCode::ALL.to_vec())
}

/// Connect codes with a dedicated gRPC counterpart.
pub fn mapped_connect_code_strategy() -> impl Strategy<Value = ConnectCode> {
    select(
        ConnectCode::ALL
            .into_iter()
            .filter(|code| !UNMAPPED_CONNECT_CODES.contains(code))
            .collect::<Vec<_>>(),
    )
}

/// Any gRPC code.
pub fn grpc_code_strategy() -> impl Strategy<Value = Code> {
    select(ALL_GRPC_CODES.to_vec())
}

/// Codes the retry engine treats as transient.
pub fn retryable_code_strategy() -> impl Strategy<Value = Code> {
    select(RETRYABLE_CODES.to_vec())
}

/// Failure codes the retry engine returns immediately.
pub fn non_retryable_code_strategy() -> impl Strategy<Value = Code> {
    select(
        ALL_GRPC_CODES
            .into_iter()
            .filter(|code| *code != Code::Ok && !RETRYABLE_CODES.contains(code))
            .collect::<Vec<_>>(),
    )
}

/// Opaque token text, valid as a metadata value.
pub fn token_strategy() -> impl Strategy<Value = String> {
    "[A-Za-z0-9._-]{1,64}"
}

/// Fully-qualified gRPC method names.
pub fn method_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{3,10}", 1u8..4, "[A-Z][a-zA-Z]{2,15}", "[A-Z][a-zA-Z]{2,15}")
        .prop_map(|(pkg, version, service, method)| format!("/{pkg}.v{version}.{service}/{method}"))
}

/// Arbitrary error message text.
pub fn message_strategy() -> impl Strategy<Value = String> {
    "\\PC{0,80}"
}

/// Small retry budgets.
pub fn max_retries_strategy() -> impl Strategy<Value = u32> {
    0u32..6
}
