//! Recovery path for when the identity provider rejects the refresh token
//! or the manager's own retry budget is exhausted: a slower queued retry
//! loop, a last-resort fallback to operator-supplied emergency tokens, and
//! a periodic health check that logs approaching expiry before it becomes
//! an outage.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::manager::TokenManager;

/// Env vars checked, in priority order, for an operator-supplied refresh
/// token when queued retries against the identity provider are exhausted.
pub const FALLBACK_REFRESH_TOKEN_VARS: [&str; 4] = [
    "INOREADER_FALLBACK_REFRESH_TOKEN",
    "INOREADER_REFRESH_TOKEN",
    "INOREADER_EMERGENCY_TOKEN",
    "EMERGENCY_REFRESH_TOKEN",
];

/// How close to expiry a token must be before the health check logs a
/// warning.
const NEAR_EXPIRY_WARNING: chrono::Duration = chrono::Duration::minutes(10);

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Default auto-refresh ticker interval.
pub const DEFAULT_AUTO_REFRESH_INTERVAL: Duration = Duration::from_secs(60);

/// Finds the first set fallback env var, returning its name and value.
pub fn find_fallback_refresh_token(
    lookup: impl Fn(&str) -> Option<String>,
) -> Option<(&'static str, String)> {
    FALLBACK_REFRESH_TOKEN_VARS
        .iter()
        .find_map(|&var| lookup(var).filter(|v| !v.is_empty()).map(|v| (var, v)))
}

/// Drives the queued-retry-then-fallback recovery sequence and a periodic
/// expiry health check for a [`TokenManager`].
pub struct RecoveryManager {
    manager: Arc<TokenManager>,
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    max_retries: u32,
}

impl RecoveryManager {
    pub fn new(manager: Arc<TokenManager>) -> Self {
        Self {
            manager,
            initial_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_interval: Duration::from_secs(600),
            max_retries: 5,
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let scaled = self.initial_interval.mul_f64(self.multiplier.powi(exp));
        let capped = scaled.min(self.max_interval);
        let jitter_frac = rand::rng().random_range(-0.1..=0.1);
        capped.mul_f64(1.0 + jitter_frac)
    }

    /// Runs the queued retry loop, then falls back to an operator-supplied
    /// emergency refresh token if every retry (or an immediate permanent
    /// rejection) leaves the manager without a usable token.
    ///
    /// `lookup` abstracts env var access so tests can inject a fake
    /// environment without mutating the process's real one.
    pub async fn recover(
        &self,
        shutdown: &CancellationToken,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        match self.manager.refresh_if_needed().await {
            Ok(()) => return Ok(()),
            Err(Error::PermanentAuth(reason)) => {
                warn!(reason, "refresh token rejected, skipping queued retries");
            }
            Err(err) => {
                warn!(error = %err, "refresh failed, entering queued retry loop");
                for attempt in 1..=self.max_retries {
                    let delay = self.delay_for(attempt);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.cancelled() => return Err(Error::NoToken),
                    }
                    match self.manager.refresh_if_needed().await {
                        Ok(()) => return Ok(()),
                        Err(Error::PermanentAuth(reason)) => {
                            warn!(reason, attempt, "refresh token rejected during queued retry");
                            break;
                        }
                        Err(err) => {
                            warn!(attempt, error = %err, "queued retry failed");
                        }
                    }
                }
            }
        }

        if let Some((var, token)) = find_fallback_refresh_token(lookup) {
            info!(var, "applying operator-supplied fallback refresh token");
            self.manager.update_refresh_token(token).await?;
            return self.manager.refresh_if_needed().await;
        }

        Err(Error::PermanentAuth(
            "queued retries exhausted and no fallback refresh token configured".into(),
        ))
    }

    /// Background auto-refresh ticker: every tick, checks whether the
    /// current token needs refresh and, if so, drives it through
    /// [`Self::recover`] so a permanent rejection falls through to the
    /// fallback env-var lookup instead of just failing the tick. A failed
    /// tick increments a metric (via the manager's own counters) and is
    /// logged, but never tears down the loop.
    pub async fn run_auto_refresh(
        &self,
        shutdown: CancellationToken,
        lookup: impl Fn(&str) -> Option<String>,
    ) {
        let mut ticker = tokio::time::interval(DEFAULT_AUTO_REFRESH_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => return,
            }
            if let Err(err) = self.recover(&shutdown, &lookup).await {
                warn!(error = %err, "auto-refresh tick failed");
            }
        }
    }

    /// Runs forever (until cancelled), logging a warning whenever the
    /// current token is within [`NEAR_EXPIRY_WARNING`] of expiring and not
    /// already mid-refresh.
    pub async fn run_health_check(&self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.cancelled() => return,
            }
            let status = self.manager.status().await;
            if status.is_refreshing {
                continue;
            }
            if let Some(expires_at) = status.expires_at {
                let remaining = expires_at - chrono::Utc::now();
                if remaining <= NEAR_EXPIRY_WARNING {
                    warn!(?remaining, "token approaching expiry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_map(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn finds_highest_priority_var_first() {
        let lookup = env_map(&[
            ("INOREADER_REFRESH_TOKEN", "rt_second"),
            ("INOREADER_FALLBACK_REFRESH_TOKEN", "rt_first"),
        ]);
        let found = find_fallback_refresh_token(lookup);
        assert_eq!(found, Some(("INOREADER_FALLBACK_REFRESH_TOKEN", "rt_first".to_string())));
    }

    #[test]
    fn skips_empty_values() {
        let lookup = env_map(&[
            ("INOREADER_FALLBACK_REFRESH_TOKEN", ""),
            ("INOREADER_EMERGENCY_TOKEN", "rt_emergency"),
        ]);
        let found = find_fallback_refresh_token(lookup);
        assert_eq!(found, Some(("INOREADER_EMERGENCY_TOKEN", "rt_emergency".to_string())));
    }

    #[test]
    fn returns_none_when_nothing_set() {
        let lookup = env_map(&[]);
        assert_eq!(find_fallback_refresh_token(lookup), None);
    }

    #[test]
    fn delay_for_grows_and_caps() {
        let manager = Arc::new(TokenManager::new(
            crate::refresh::RefreshClient::new("http://127.0.0.1:1".into(), "id".into(), None),
            chrono::Duration::seconds(5),
            chrono::Duration::seconds(60),
        ));
        let recovery = RecoveryManager::new(manager);
        let d1 = recovery.delay_for(1);
        let d5 = recovery.delay_for(5);
        assert!(d1.as_secs_f64() >= 27.0 && d1.as_secs_f64() <= 33.0);
        assert!(d5.as_secs() <= recovery.max_interval.as_secs() + 60);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_refresh_tick_refreshes_a_token_within_buffer() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

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

        let manager = Arc::new(TokenManager::new(
            crate::refresh::RefreshClient::new(
                format!("{}/oauth2/token", server.uri()),
                "client-id".into(),
                None,
            ),
            chrono::Duration::seconds(5),
            chrono::Duration::minutes(5),
        ));
        manager
            .update_token_directly(
                "at_old".into(),
                "rt_old".into(),
                "Bearer".into(),
                chrono::Utc::now() + chrono::Duration::seconds(30),
                "read".into(),
            )
            .await
            .unwrap();

        let recovery = Arc::new(RecoveryManager::new(manager.clone()));
        let shutdown = CancellationToken::new();
        let handle = {
            let recovery = recovery.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                recovery.run_auto_refresh(shutdown, |_| None).await;
            })
        };

        tokio::time::advance(DEFAULT_AUTO_REFRESH_INTERVAL + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        let status = manager.status().await;
        assert_eq!(status.has_access_token, true);

        shutdown.cancel();
        handle.await.unwrap();

        let token = manager.get_valid_token().await.unwrap();
        assert_eq!(token.access_token, "at_new");
    }
}
