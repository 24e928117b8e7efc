//! Error types for repository operations

/// Errors from repository calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("uniqueness violation: {0}")]
    UniquenessViolation(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Result alias for repository operations.
pub type Result<T> = std::result::Result<T, Error>;
