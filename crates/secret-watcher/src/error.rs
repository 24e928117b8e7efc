//! Error types for the Kubernetes Secret watcher.

/// Errors from fetching or decoding a watched Secret.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(String),

    #[error("secret missing key {0}")]
    MissingKey(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("invalid token payload: {0}")]
    InvalidPayload(String),
}

pub type Result<T> = std::result::Result<T, Error>;
