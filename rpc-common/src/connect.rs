//! Connect protocol errors and their translation to gRPC status codes.
//!
//! Services that expose both Connect (HTTP) handlers and gRPC servers share
//! business logic returning [`ConnectError`]. Before such an error leaves a
//! gRPC handler it goes through [`connect_to_grpc_error`].

use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tonic::{Code, Status};

/// Connect protocol error codes, named as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectCode {
    /// The operation was cancelled.
    Canceled,
    /// Unknown error.
    Unknown,
    /// The client sent an invalid argument.
    InvalidArgument,
    /// The deadline expired before the operation completed.
    DeadlineExceeded,
    /// The requested entity was not found.
    NotFound,
    /// The entity the client tried to create already exists.
    AlreadyExists,
    /// The caller lacks permission for the operation.
    PermissionDenied,
    /// A resource has been exhausted.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted.
    Aborted,
    /// The operation was attempted past the valid range.
    OutOfRange,
    /// The operation is not implemented.
    Unimplemented,
    /// Internal invariant broken.
    Internal,
    /// The service is currently unavailable.
    Unavailable,
    /// Unrecoverable data loss or corruption.
    DataLoss,
    /// The request lacks valid authentication credentials.
    Unauthenticated,
}

impl ConnectCode {
    /// All Connect codes, in protocol order.
    pub const ALL: [Self; 16] = [
        Self::Canceled,
        Self::Unknown,
        Self::InvalidArgument,
        Self::DeadlineExceeded,
        Self::NotFound,
        Self::AlreadyExists,
        Self::PermissionDenied,
        Self::ResourceExhausted,
        Self::FailedPrecondition,
        Self::Aborted,
        Self::OutOfRange,
        Self::Unimplemented,
        Self::Internal,
        Self::Unavailable,
        Self::DataLoss,
        Self::Unauthenticated,
    ];

    /// Wire name of the code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Canceled => "canceled",
            Self::Unknown => "unknown",
            Self::InvalidArgument => "invalid_argument",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::NotFound => "not_found",
            Self::AlreadyExists => "already_exists",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceExhausted => "resource_exhausted",
            Self::FailedPrecondition => "failed_precondition",
            Self::Aborted => "aborted",
            Self::OutOfRange => "out_of_range",
            Self::Unimplemented => "unimplemented",
            Self::Internal => "internal",
            Self::Unavailable => "unavailable",
            Self::DataLoss => "data_loss",
            Self::Unauthenticated => "unauthenticated",
        }
    }

    /// The gRPC code this Connect code translates to.
    ///
    /// Canceled, Unknown and DeadlineExceeded have no entry in the bridge
    /// table and fall through to [`Code::Unknown`].
    #[must_use]
    pub const fn grpc_code(&self) -> Code {
        match self {
            Self::NotFound => Code::NotFound,
            Self::InvalidArgument => Code::InvalidArgument,
            Self::AlreadyExists => Code::AlreadyExists,
            Self::PermissionDenied => Code::PermissionDenied,
            Self::Unauthenticated => Code::Unauthenticated,
            Self::ResourceExhausted => Code::ResourceExhausted,
            Self::FailedPrecondition => Code::FailedPrecondition,
            Self::Aborted => Code::Aborted,
            Self::OutOfRange => Code::OutOfRange,
            Self::Unimplemented => Code::Unimplemented,
            Self::Internal => Code::Internal,
            Self::Unavailable => Code::Unavailable,
            Self::DataLoss => Code::DataLoss,
            Self::Canceled | Self::Unknown | Self::DeadlineExceeded => Code::Unknown,
        }
    }
}

impl fmt::Display for ConnectCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when parsing an unrecognized Connect code name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown connect code: {0}")]
pub struct UnknownConnectCode(pub String);

impl FromStr for ConnectCode {
    type Err = UnknownConnectCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| UnknownConnectCode(s.to_string()))
    }
}

/// An error produced by a Connect handler: a code plus a message.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct ConnectError {
    code: ConnectCode,
    message: String,
}

impl ConnectError {
    /// Create a new Connect error.
    #[must_use]
    pub fn new(code: ConnectCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The error code.
    #[must_use]
    pub const fn code(&self) -> ConnectCode {
        self.code
    }

    /// The message, without the code prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ConnectError> for Status {
    fn from(err: ConnectError) -> Self {
        Self::new(err.code.grpc_code(), err.message)
    }
}

/// Convert an optional error into an equivalent gRPC status.
///
/// A [`ConnectError`] keeps its message verbatim under the translated code.
/// Any other error becomes [`Code::Unknown`] with its display text. No error
/// yields no status.
#[must_use]
pub fn connect_to_grpc_error(err: Option<&(dyn StdError + 'static)>) -> Option<Status> {
    let err = err?;
    let status = match err.downcast_ref::<ConnectError>() {
        Some(connect_err) => Status::new(connect_err.code.grpc_code(), connect_err.message()),
        None => Status::new(Code::Unknown, err.to_string()),
    };
    Some(status)
}
