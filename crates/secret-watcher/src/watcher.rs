//! Background polling loop that pushes Secret updates into the token
//! manager: a thin spawn wrapper around a testable per-tick function.

use std::sync::Arc;
use std::time::Duration;

use oauth_token::TokenManager;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::client::KubeSecretClient;
use crate::model::decode_token_payload;

/// Default poll interval.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Polls a single Kubernetes Secret and pushes decoded credential updates
/// into a [`TokenManager`]. Never calls any refresh-invoking entry point —
/// only `update_token_directly`.
pub struct SecretWatcher {
    client: KubeSecretClient,
    token_manager: Arc<TokenManager>,
    last_resource_version: RwLock<Option<String>>,
}

impl SecretWatcher {
    pub fn new(client: KubeSecretClient, token_manager: Arc<TokenManager>) -> Self {
        Self {
            client,
            token_manager,
            last_resource_version: RwLock::new(None),
        }
    }

    /// Runs one poll tick. Errors are logged and swallowed: the baseline
    /// resource version only advances on a fully successful decode-and-push,
    /// so a failed tick retries from scratch next time.
    pub async fn poll_once(&self) {
        let secret = match self.client.fetch().await {
            Ok(secret) => secret,
            Err(e) => {
                warn!(error = %e, "failed to fetch secret, will retry next tick");
                return;
            }
        };

        let previous = self.last_resource_version.read().await.clone();
        if previous.as_deref() == Some(secret.metadata.resource_version.as_str()) {
            debug!(resource_version = %secret.metadata.resource_version, "secret unchanged");
            return;
        }

        if previous.is_none() {
            info!(resource_version = %secret.metadata.resource_version, "recording initial secret baseline");
            *self.last_resource_version.write().await = Some(secret.metadata.resource_version.clone());
            return;
        }

        let payload = match decode_token_payload(&secret) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "failed to decode secret payload, baseline not advanced");
                return;
            }
        };

        let result = self
            .token_manager
            .update_token_directly(
                payload.access_token,
                payload.refresh_token,
                payload.token_type,
                payload.expires_at,
                payload.scope,
            )
            .await;

        match result {
            Ok(()) => {
                info!(resource_version = %secret.metadata.resource_version, "pushed updated credentials from secret");
                *self.last_resource_version.write().await = Some(secret.metadata.resource_version);
            }
            Err(e) => {
                warn!(error = %e, "failed to push credentials into token manager, baseline not advanced");
            }
        }
    }
}

/// Spawns the poll loop on the current Tokio runtime. Returns a `JoinHandle`
/// the caller can use to abort it on shutdown.
pub fn spawn_watch_task(
    watcher: Arc<SecretWatcher>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            watcher.poll_once().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use chrono::Duration as ChronoDuration;
    use oauth_token::RefreshClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn body_with_token(resource_version: &str, payload_json: &str) -> serde_json::Value {
        serde_json::json!({
            "metadata": {"resourceVersion": resource_version},
            "data": {"token_data": BASE64.encode(payload_json)}
        })
    }

    fn test_manager() -> Arc<TokenManager> {
        Arc::new(TokenManager::new(
            RefreshClient::new("https://example.invalid/token".into(), "client-id".into(), None),
            ChronoDuration::seconds(30),
            ChronoDuration::minutes(5),
        ))
    }

    #[tokio::test]
    async fn first_tick_records_baseline_without_pushing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/secrets/oauth-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body_with_token(
                "1",
                r#"{"access_token":"at","refresh_token":"rt"}"#,
            )))
            .mount(&server)
            .await;

        let client =
            KubeSecretClient::new(server.uri(), "default".into(), "oauth-token".into(), "tok".into(), None)
                .unwrap();
        let manager = test_manager();
        let watcher = SecretWatcher::new(client, manager.clone());
        watcher.poll_once().await;

        let status = manager.status().await;
        assert!(!status.has_access_token, "first observation must not push a token");
    }

    #[tokio::test]
    async fn changed_resource_version_pushes_decoded_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/secrets/oauth-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body_with_token(
                "1",
                r#"{"access_token":"at","refresh_token":"rt"}"#,
            )))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/secrets/oauth-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body_with_token(
                "2",
                r#"{"access_token":"at2","refresh_token":"rt2"}"#,
            )))
            .mount(&server)
            .await;

        let client =
            KubeSecretClient::new(server.uri(), "default".into(), "oauth-token".into(), "tok".into(), None)
                .unwrap();
        let manager = test_manager();
        let watcher = SecretWatcher::new(client, manager.clone());
        watcher.poll_once().await;
        watcher.poll_once().await;

        let status = manager.status().await;
        assert!(status.has_access_token, "second, changed observation must push a token");
    }

    #[tokio::test]
    async fn unchanged_resource_version_does_not_repush() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/namespaces/default/secrets/oauth-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body_with_token(
                "1",
                r#"{"access_token":"at","refresh_token":"rt"}"#,
            )))
            .mount(&server)
            .await;

        let client =
            KubeSecretClient::new(server.uri(), "default".into(), "oauth-token".into(), "tok".into(), None)
                .unwrap();
        let manager = test_manager();
        let watcher = SecretWatcher::new(client, manager.clone());
        watcher.poll_once().await;
        watcher.poll_once().await;
        watcher.poll_once().await;

        // Still no push: resource version never changed past the baseline.
        let status = manager.status().await;
        assert!(!status.has_access_token);
    }
}
