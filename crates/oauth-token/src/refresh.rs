//! Single HTTP round-trip to the identity provider's token endpoint.
//!
//! This module performs exactly one refresh attempt per call; the retry
//! loop (backoff, attempt counting, giving up) lives in [`crate::manager`].

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{RefreshFailure, classify_refresh_error};

/// Per-attempt timeout for a refresh HTTP call.
const REFRESH_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Response body from a successful refresh-grant POST.
#[derive(Debug, Deserialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: u64,
    /// Present when the provider rotates the refresh token on use.
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// A classified failure from one refresh attempt, carrying enough detail
/// for [`crate::manager`]'s retry loop to pick the right backoff and decide
/// whether to give up.
#[derive(Debug)]
pub struct RefreshAttemptError {
    pub kind: RefreshFailure,
    pub message: String,
}

/// Performs the OAuth2 `refresh_token` grant against a configured endpoint.
pub struct RefreshClient {
    http: reqwest::Client,
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
}

impl RefreshClient {
    pub fn new(token_endpoint: String, client_id: String, client_secret: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            token_endpoint,
            client_id,
            client_secret,
        }
    }

    /// Attempt one refresh. Classifies the failure so the caller's retry
    /// loop can decide whether to back off and try again or give up.
    pub async fn refresh(
        &self,
        refresh_token: &str,
    ) -> std::result::Result<RefreshResponse, RefreshAttemptError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .timeout(REFRESH_CALL_TIMEOUT)
            .send()
            .await
            .map_err(|e| RefreshAttemptError {
                kind: RefreshFailure::Transient,
                message: format!("refresh request failed: {e}"),
            })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<RefreshResponse>()
                .await
                .map_err(|e| RefreshAttemptError {
                    kind: RefreshFailure::Transient,
                    message: format!("invalid refresh response: {e}"),
                });
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));
        debug!(status = status.as_u16(), "refresh endpoint returned an error");

        Err(RefreshAttemptError {
            kind: classify_refresh_error(&body),
            message: body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_response_deserializes_minimal() {
        let json = r#"{"access_token":"at_1","expires_in":3600}"#;
        let parsed: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.access_token, "at_1");
        assert_eq!(parsed.expires_in, 3600);
        assert!(parsed.refresh_token.is_none());
    }

    #[test]
    fn refresh_response_deserializes_with_rotation() {
        let json = r#"{"access_token":"at_1","refresh_token":"rt_new","expires_in":3600,"token_type":"Bearer","scope":"read"}"#;
        let parsed: RefreshResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.refresh_token.as_deref(), Some("rt_new"));
        assert_eq!(parsed.token_type.as_deref(), Some("Bearer"));
    }

    #[tokio::test]
    async fn refresh_against_unreachable_endpoint_is_transient() {
        let client = RefreshClient::new(
            "http://127.0.0.1:1/oauth2/token".into(),
            "client-id".into(),
            None,
        );
        let err = client.refresh("rt_whatever").await.unwrap_err();
        assert_eq!(err.kind, RefreshFailure::Transient);
    }
}
