//! Service-specific error types.

use thiserror::Error;

/// Ingest sidecar errors, mapped onto coarse RPC status codes by the
/// handler layer rather than carried as HTTP status codes themselves.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("handler not configured: {0}")]
    Unimplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ingest_repo::Error> for Error {
    fn from(err: ingest_repo::Error) -> Self {
        match err {
            ingest_repo::Error::NotFound(msg) => Error::NotFound(msg),
            ingest_repo::Error::Validation(msg) => Error::InvalidArgument(msg),
            ingest_repo::Error::UniquenessViolation(msg) => Error::InvalidArgument(msg),
            ingest_repo::Error::Storage(msg) => Error::Internal(msg),
        }
    }
}

impl From<ingest::Error> for Error {
    fn from(err: ingest::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

/// Coarse RPC status code, attached to every error response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    Unimplemented,
    Internal,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Config(_) => ErrorCode::Internal,
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::Unimplemented(_) => ErrorCode::Unimplemented,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    pub fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.code() {
            ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result alias.
pub type Result<T> = std::result::Result<T, Error>;
