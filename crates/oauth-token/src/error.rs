//! Error types for OAuth2 token lifecycle operations

use std::time::Duration;

/// Errors from token manager operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No token has ever been provisioned.
    #[error("no token available")]
    NoToken,

    /// The identity provider rejected the refresh token itself
    /// (`invalid_grant`, `invalid_refresh_token`, `token_revoked`).
    /// Never retried automatically.
    #[error("permanent auth failure: {0}")]
    PermanentAuth(String),

    /// A refresh attempt failed for a reason that may succeed on retry.
    #[error("transient auth failure: {0}")]
    TransientAuth(String),

    /// The identity provider (or local quota bookkeeping) asked us to wait.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// A caller-supplied token or refresh token failed validation
    /// (empty access/refresh field, malformed payload).
    #[error("validation error: {0}")]
    Validation(String),

    /// Persisting a refreshed/rotated token to the backing store failed.
    /// Raised even when the in-memory token is valid, so callers never
    /// silently rely on state that didn't make it to storage.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result alias for token manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a refresh failure, used to decide the retry strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailure {
    /// `invalid_grant` / `invalid_refresh_token` / `token_revoked` — stop immediately.
    Permanent,
    /// The provider asked us to back off.
    RateLimited,
    /// The provider reported a server-side temporary failure.
    ServerTemporary,
    /// Any other transient error (timeout, connection reset, 5xx, ...).
    Transient,
}

/// Classify the identity provider's error body for a failed refresh.
///
/// Looks for the well-known OAuth2 error codes: `invalid_grant`,
/// `invalid_refresh_token`, and `token_revoked` are permanent; everything
/// else is treated as transient so the caller retries rather than giving up
/// on a classification it doesn't recognize.
pub fn classify_refresh_error(body: &str) -> RefreshFailure {
    let lower = body.to_lowercase();
    if lower.contains("invalid_grant")
        || lower.contains("invalid_refresh_token")
        || lower.contains("token_revoked")
    {
        RefreshFailure::Permanent
    } else if lower.contains("rate_limited") {
        RefreshFailure::RateLimited
    } else if lower.contains("temporary_failure") {
        RefreshFailure::ServerTemporary
    } else {
        RefreshFailure::Transient
    }
}

/// Compute the backoff delay for the given 1-indexed attempt and failure kind.
///
/// - Rate limited: `30 * attempt` seconds.
/// - Server-signalled temporary failure: `10 * attempt` seconds.
/// - Any other transient failure: `2 * attempt` seconds.
/// - Permanent failures have no backoff; callers must not retry them.
pub fn backoff_for(attempt: u32, failure: RefreshFailure) -> Option<Duration> {
    match failure {
        RefreshFailure::Permanent => None,
        RefreshFailure::RateLimited => Some(Duration::from_secs(30 * attempt as u64)),
        RefreshFailure::ServerTemporary => Some(Duration::from_secs(10 * attempt as u64)),
        RefreshFailure::Transient => Some(Duration::from_secs(2 * attempt as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_invalid_grant_as_permanent() {
        let body = r#"{"error":"invalid_grant"}"#;
        assert_eq!(classify_refresh_error(body), RefreshFailure::Permanent);
    }

    #[test]
    fn classifies_invalid_refresh_token_as_permanent() {
        let body = r#"{"error":"invalid_refresh_token"}"#;
        assert_eq!(classify_refresh_error(body), RefreshFailure::Permanent);
    }

    #[test]
    fn classifies_token_revoked_as_permanent() {
        let body = r#"{"error":"token_revoked"}"#;
        assert_eq!(classify_refresh_error(body), RefreshFailure::Permanent);
    }

    #[test]
    fn classifies_rate_limited() {
        let body = r#"{"error":"rate_limited"}"#;
        assert_eq!(classify_refresh_error(body), RefreshFailure::RateLimited);
    }

    #[test]
    fn classifies_temporary_failure() {
        let body = r#"{"error":"temporary_failure"}"#;
        assert_eq!(
            classify_refresh_error(body),
            RefreshFailure::ServerTemporary
        );
    }

    #[test]
    fn classifies_unknown_as_transient() {
        let body = r#"{"error":"server_error"}"#;
        assert_eq!(classify_refresh_error(body), RefreshFailure::Transient);
    }

    #[test]
    fn classify_is_case_insensitive() {
        let body = r#"{"error":"INVALID_GRANT"}"#;
        assert_eq!(classify_refresh_error(body), RefreshFailure::Permanent);
    }

    #[test]
    fn backoff_permanent_is_none() {
        assert_eq!(backoff_for(1, RefreshFailure::Permanent), None);
    }

    #[test]
    fn backoff_rate_limited_scales_by_attempt() {
        assert_eq!(
            backoff_for(2, RefreshFailure::RateLimited),
            Some(Duration::from_secs(60))
        );
    }

    #[test]
    fn backoff_server_temporary_scales_by_attempt() {
        assert_eq!(
            backoff_for(3, RefreshFailure::ServerTemporary),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn backoff_transient_scales_by_attempt() {
        assert_eq!(
            backoff_for(4, RefreshFailure::Transient),
            Some(Duration::from_secs(8))
        );
    }
}
