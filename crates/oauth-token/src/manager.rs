//! Token manager: owns the current OAuth2 token, keeps it encrypted at
//! rest in memory, and coordinates refresh so concurrent callers never
//! trigger more than one outbound refresh call at a time.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, instrument, warn};

use crate::crypto::{Sealed, TokenCipher};
use crate::error::{Error, Result, backoff_for};
use crate::model::{OAuth2Token, TokenStatus};
use crate::refresh::RefreshClient;

/// Default per-refresh retry budget (`max_attempts`, default 3).
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

struct TokenState {
    sealed_access: Option<Sealed>,
    sealed_refresh: Option<Sealed>,
    token_type: String,
    scope: String,
    issued_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    /// Set once the identity provider has rejected the refresh token itself.
    /// Sticky: every subsequent `get_valid_token` fails fast without
    /// re-attempting a refresh we already know will be rejected, until a
    /// fresh refresh token arrives via `update_refresh_token` or
    /// `update_token_directly`.
    permanent_error: Option<String>,
    is_refreshing: bool,
}

impl TokenState {
    fn empty() -> Self {
        Self {
            sealed_access: None,
            sealed_refresh: None,
            token_type: "Bearer".into(),
            scope: String::new(),
            issued_at: None,
            expires_at: None,
            permanent_error: None,
            is_refreshing: false,
        }
    }

    fn has_access_token(&self) -> bool {
        self.sealed_access.is_some()
    }

    fn has_refresh_token(&self) -> bool {
        self.sealed_refresh.is_some()
    }
}

/// Owns the current OAuth2 token and coordinates refresh.
///
/// Token material is kept AES-GCM sealed between calls ([`TokenCipher`]);
/// refresh is coalesced across concurrent callers via `refresh_gate` so a
/// burst of callers hitting `get_valid_token` around expiry produces at
/// most one outbound refresh request.
pub struct TokenManager {
    state: RwLock<TokenState>,
    refresh_gate: Mutex<()>,
    cipher: TokenCipher,
    client: RefreshClient,
    clock_skew: ChronoDuration,
    refresh_buffer: ChronoDuration,
    max_attempts: u32,
}

impl TokenManager {
    pub fn new(
        client: RefreshClient,
        clock_skew: ChronoDuration,
        refresh_buffer: ChronoDuration,
    ) -> Self {
        Self {
            state: RwLock::new(TokenState::empty()),
            refresh_gate: Mutex::new(()),
            cipher: TokenCipher::new(),
            client,
            clock_skew,
            refresh_buffer,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Returns a usable token, refreshing first if it is within the refresh
    /// buffer of expiry. Fails fast with the cached `PermanentAuth` error if
    /// the refresh token is already known to be rejected by the provider.
    #[instrument(skip(self))]
    pub async fn get_valid_token(&self) -> Result<OAuth2Token> {
        {
            let guard = self.state.read().await;
            if let Some(reason) = &guard.permanent_error {
                return Err(Error::PermanentAuth(reason.clone()));
            }
            if !guard.has_access_token() {
                return Err(Error::NoToken);
            }
            let token = self.decrypt_current(&guard)?;
            if !token.needs_refresh(Utc::now(), self.refresh_buffer) {
                return Ok(token);
            }
        }

        self.refresh_if_needed().await?;

        let guard = self.state.read().await;
        if let Some(reason) = &guard.permanent_error {
            return Err(Error::PermanentAuth(reason.clone()));
        }
        self.decrypt_current(&guard)
    }

    fn decrypt_current(&self, state: &TokenState) -> Result<OAuth2Token> {
        let sealed_access = state.sealed_access.as_ref().ok_or(Error::NoToken)?;
        let sealed_refresh = state.sealed_refresh.as_ref().ok_or(Error::NoToken)?;
        let access_token = self.cipher.unseal(sealed_access)?;
        let refresh_token = self.cipher.unseal(sealed_refresh)?;
        Ok(OAuth2Token {
            access_token,
            refresh_token,
            token_type: state.token_type.clone(),
            expires_at: state.expires_at.ok_or(Error::NoToken)?,
            issued_at: state.issued_at.ok_or(Error::NoToken)?,
            scope: state.scope.clone(),
        })
    }

    /// Refreshes the token if it still needs it once the refresh gate is
    /// acquired. Single-flight: the first caller through the gate performs
    /// the retry loop; everyone else finds the token already fresh on the
    /// double-check and returns immediately without a second outbound call.
    #[instrument(skip(self))]
    pub async fn refresh_if_needed(&self) -> Result<()> {
        let _gate = self.refresh_gate.lock().await;

        {
            let guard = self.state.read().await;
            if let Some(reason) = &guard.permanent_error {
                return Err(Error::PermanentAuth(reason.clone()));
            }
            if guard.has_access_token() {
                let token = self.decrypt_current(&guard)?;
                if !token.needs_refresh(Utc::now(), self.refresh_buffer) {
                    return Ok(());
                }
            }
        }

        let refresh_token = {
            let mut guard = self.state.write().await;
            guard.is_refreshing = true;
            let sealed = guard.sealed_refresh.clone().ok_or(Error::NoToken)?;
            drop(guard);
            self.cipher.unseal(&sealed)?
        };

        let outcome = self.retry_refresh(&refresh_token).await;

        let mut guard = self.state.write().await;
        guard.is_refreshing = false;
        match outcome {
            Ok((access, refresh, expires_in, token_type, scope)) => {
                let now = Utc::now();
                guard.sealed_access = Some(self.cipher.seal(&access));
                guard.sealed_refresh = Some(self.cipher.seal(&refresh));
                guard.issued_at = Some(now);
                guard.expires_at = Some(now + ChronoDuration::seconds(expires_in as i64));
                if let Some(token_type) = token_type {
                    guard.token_type = token_type;
                }
                if let Some(scope) = scope {
                    guard.scope = scope;
                }
                guard.permanent_error = None;
                info!("token refreshed");
                metrics::counter!("oauth_token_refresh_total", "result" => "success").increment(1);
                Ok(())
            }
            Err(err) => {
                if let Error::PermanentAuth(reason) = &err {
                    guard.permanent_error = Some(reason.clone());
                    metrics::counter!("oauth_token_refresh_total", "result" => "permanent_failure")
                        .increment(1);
                } else {
                    metrics::counter!("oauth_token_refresh_total", "result" => "transient_failure")
                        .increment(1);
                }
                Err(err)
            }
        }
    }

    /// Retry loop: attempts the refresh up to `max_attempts` times, backing
    /// off per [`backoff_for`] between attempts. Permanent failures stop
    /// immediately without consuming the retry budget.
    async fn retry_refresh(
        &self,
        refresh_token: &str,
    ) -> Result<(String, String, u64, Option<String>, Option<String>)> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.client.refresh(refresh_token).await {
                Ok(response) => {
                    return Ok((
                        response.access_token,
                        response.refresh_token.unwrap_or_else(|| refresh_token.to_string()),
                        response.expires_in,
                        response.token_type,
                        response.scope,
                    ));
                }
                Err(attempt_err) => {
                    warn!(
                        attempt,
                        kind = ?attempt_err.kind,
                        "refresh attempt failed"
                    );
                    let Some(delay) = backoff_for(attempt, attempt_err.kind) else {
                        return Err(Error::PermanentAuth(attempt_err.message));
                    };
                    if attempt >= self.max_attempts {
                        return Err(transient_error(attempt_err.kind, attempt_err.message));
                    }
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Pushes a token directly into the manager without contacting the
    /// identity provider. Used by the secret watcher, which must never
    /// trigger a refresh call itself.
    #[instrument(skip(self, access_token, refresh_token))]
    pub async fn update_token_directly(
        &self,
        access_token: String,
        refresh_token: String,
        token_type: String,
        expires_at: DateTime<Utc>,
        scope: String,
    ) -> Result<()> {
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(Error::Validation(
                "access_token and refresh_token must be non-empty".into(),
            ));
        }
        let mut guard = self.state.write().await;
        guard.sealed_access = Some(self.cipher.seal(&access_token));
        guard.sealed_refresh = Some(self.cipher.seal(&refresh_token));
        guard.token_type = token_type;
        guard.issued_at = Some(Utc::now());
        guard.expires_at = Some(expires_at);
        guard.scope = scope;
        guard.permanent_error = None;
        info!("token updated directly from credential store");
        Ok(())
    }

    /// Replaces only the refresh token, e.g. from a recovery fallback
    /// source. Clears any cached permanent-auth error so the next
    /// `get_valid_token` attempts a fresh refresh with the new token.
    #[instrument(skip(self, refresh_token))]
    pub async fn update_refresh_token(&self, refresh_token: String) -> Result<()> {
        if refresh_token.is_empty() {
            return Err(Error::Validation("refresh_token must be non-empty".into()));
        }
        let mut guard = self.state.write().await;
        guard.sealed_refresh = Some(self.cipher.seal(&refresh_token));
        guard.permanent_error = None;
        Ok(())
    }

    /// Non-blocking snapshot of manager state for health/status endpoints.
    pub async fn status(&self) -> TokenStatus {
        let guard = self.state.read().await;
        TokenStatus {
            has_access_token: guard.has_access_token(),
            has_refresh_token: guard.has_refresh_token(),
            expires_at: guard.expires_at,
            needs_refresh: guard
                .expires_at
                .map(|exp| Utc::now() + self.refresh_buffer >= exp)
                .unwrap_or(false),
            is_refreshing: guard.is_refreshing,
        }
    }
}

fn transient_error(kind: crate::error::RefreshFailure, message: String) -> Error {
    match kind {
        crate::error::RefreshFailure::RateLimited => Error::RateLimited {
            retry_after: StdDuration::from_secs(30),
        },
        _ => Error::TransientAuth(message),
    }
}

/// Shared handle type callers depend on.
pub type SharedTokenManager = Arc<TokenManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refresh::RefreshClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn manager_with_mock(server: &MockServer) -> TokenManager {
        let client = RefreshClient::new(
            format!("{}/oauth2/token", server.uri()),
            "client-id".into(),
            None,
        );
        TokenManager::new(client, ChronoDuration::seconds(5), ChronoDuration::seconds(60))
    }

    #[tokio::test]
    async fn no_token_before_any_update() {
        let server = MockServer::start().await;
        let manager = manager_with_mock(&server).await;
        assert!(matches!(
            manager.get_valid_token().await,
            Err(Error::NoToken)
        ));
    }

    #[tokio::test]
    async fn direct_update_then_valid_token_short_circuits_refresh() {
        let server = MockServer::start().await;
        let manager = manager_with_mock(&server).await;
        manager
            .update_token_directly(
                "at_1".into(),
                "rt_1".into(),
                "Bearer".into(),
                Utc::now() + ChronoDuration::hours(1),
                "read".into(),
            )
            .await
            .unwrap();
        let token = manager.get_valid_token().await.unwrap();
        assert_eq!(token.access_token, "at_1");
    }

    #[tokio::test]
    async fn refresh_triggers_when_within_buffer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at_new",
                "refresh_token": "rt_new",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;
        let manager = manager_with_mock(&server).await;
        manager
            .update_token_directly(
                "at_old".into(),
                "rt_old".into(),
                "Bearer".into(),
                Utc::now() + ChronoDuration::seconds(1),
                "read".into(),
            )
            .await
            .unwrap();
        let token = manager.get_valid_token().await.unwrap();
        assert_eq!(token.access_token, "at_new");
        assert_eq!(token.refresh_token, "rt_new");
    }

    #[tokio::test]
    async fn permanent_failure_is_cached_and_short_circuits_further_refreshes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;
        let manager = manager_with_mock(&server).await;
        manager
            .update_token_directly(
                "at_old".into(),
                "rt_old".into(),
                "Bearer".into(),
                Utc::now() + ChronoDuration::seconds(1),
                "read".into(),
            )
            .await
            .unwrap();

        let first = manager.get_valid_token().await;
        assert!(matches!(first, Err(Error::PermanentAuth(_))));

        // Second call must fail fast without hitting the mock again; the
        // server has no further expectations registered so an extra call
        // would make the mock assertion fail on drop.
        let second = manager.get_valid_token().await;
        assert!(matches!(second, Err(Error::PermanentAuth(_))));
    }

    #[tokio::test]
    async fn single_flight_coalesces_concurrent_refreshes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at_new",
                "refresh_token": "rt_new",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;
        let manager = Arc::new(manager_with_mock(&server).await);
        manager
            .update_token_directly(
                "at_old".into(),
                "rt_old".into(),
                "Bearer".into(),
                Utc::now() + ChronoDuration::seconds(1),
                "read".into(),
            )
            .await
            .unwrap();

        let a = manager.clone();
        let b = manager.clone();
        let (ra, rb) = tokio::join!(
            tokio::spawn(async move { a.get_valid_token().await }),
            tokio::spawn(async move { b.get_valid_token().await }),
        );
        assert_eq!(ra.unwrap().unwrap().access_token, "at_new");
        assert_eq!(rb.unwrap().unwrap().access_token, "at_new");
    }
}
