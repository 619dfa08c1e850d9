//! Error types for the catalog service.

use tonic::{Code, Status};

/// Main error type for the library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record with the same key is already stored.
    #[error("{0} already exists")]
    AlreadyExists(String),

    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// A request carried a malformed or out-of-range value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A token failed to decode or its signature did not verify.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// A token's validity window has passed.
    #[error("Token has expired")]
    TokenExpired,

    /// Credentials were missing or did not match.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(String),

    /// The caller's role is not allowed to invoke the method.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// The caller cancelled the call.
    #[error("Request is canceled")]
    Canceled,

    /// The call's deadline passed before it completed.
    #[error("Deadline is exceeded")]
    DeadlineExceeded,

    /// Password hashing or hash parsing failed.
    #[error("Password hash error: {0}")]
    PasswordHash(String),

    /// Filesystem failure while persisting data.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is unusable.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A stream message could not be received or sent.
    #[error("Transport error: {0}")]
    Unknown(String),

    /// Any other server-side failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match err {
            Error::AlreadyExists(_) => Status::already_exists(message),
            Error::NotFound(_) => Status::not_found(message),
            Error::InvalidArgument(_) => Status::invalid_argument(message),
            Error::InvalidToken(_) | Error::TokenExpired | Error::Unauthenticated(_) => {
                Status::unauthenticated(message)
            }
            Error::PermissionDenied(_) => Status::permission_denied(message),
            Error::Canceled => Status::cancelled(message),
            Error::DeadlineExceeded => Status::deadline_exceeded(message),
            Error::Unknown(_) => Status::unknown(message),
            Error::PasswordHash(_) | Error::Io(_) | Error::Config(_) | Error::Internal(_) => {
                Status::internal(message)
            }
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::AlreadyExists => Error::AlreadyExists(message),
            Code::NotFound => Error::NotFound(message),
            Code::InvalidArgument => Error::InvalidArgument(message),
            Code::Unauthenticated => Error::Unauthenticated(message),
            Code::PermissionDenied => Error::PermissionDenied(message),
            Code::Cancelled => Error::Canceled,
            Code::DeadlineExceeded => Error::DeadlineExceeded,
            Code::Internal => Error::Internal(message),
            _ => Error::Unknown(format!("{}: {message}", status.code())),
        }
    }
}
