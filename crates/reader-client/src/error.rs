//! Error types for reader-API client operations.

use std::time::Duration;

/// Errors from API client operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Either local quota bookkeeping or the server's `429`/`Retry-After`
    /// said to wait; no HTTP call was made (local exhaustion) or the call
    /// failed after exhausting retries (server-signalled).
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// A non-retryable HTTP status (400, 401, 404) or a retryable status
    /// that exhausted its retry budget.
    #[error("http error: {0}")]
    Http(String),

    /// The response body did not match the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
}

/// Result alias for API client operations.
pub type Result<T> = std::result::Result<T, Error>;
