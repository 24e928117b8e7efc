//! Authenticated HTTP client for the reader API: quota gating, retry with
//! backoff, and parsing into domain types.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ingest_repo::{ApiUsageRepository, Article, HeaderSnapshot, Subscription, Zone};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{SubscriptionListResponse, StreamContentsResponse, parse_stream_contents, parse_subscriptions};
use crate::quota::{DEFAULT_SAFETY_BUFFER, DEFAULT_ZONE_LIMIT, can_issue, classify_endpoint, parse_header_snapshot};

/// Per-call HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Backoff parameters for transient-failure retries.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_retries: 3,
        }
    }
}

impl RetryConfig {
    /// `initial_delay * multiplier^(attempt-1)`, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self
            .initial_delay
            .mul_f64(self.multiplier.powi(attempt.saturating_sub(1) as i32));
        scaled.min(self.max_delay)
    }
}

/// Whether an HTTP status is retryable: 403 (observed transient by the
/// upstream), 408, and transport-level timeouts/connection-refused (handled
/// separately by the caller). 400/401/404 are never retried.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 403 | 408)
}

/// Authenticated client for the reader API's subscription-list and
/// stream-contents endpoints.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    usage_repo: Arc<dyn ApiUsageRepository>,
    snapshot: RwLock<Option<HeaderSnapshot>>,
    zone1_limit: u32,
    zone2_limit: u32,
    safety_buffer: u32,
    retry: RetryConfig,
}

impl ApiClient {
    pub fn new(base_url: String, usage_repo: Arc<dyn ApiUsageRepository>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            usage_repo,
            snapshot: RwLock::new(None),
            zone1_limit: DEFAULT_ZONE_LIMIT,
            zone2_limit: DEFAULT_ZONE_LIMIT,
            safety_buffer: DEFAULT_SAFETY_BUFFER,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_limits(mut self, zone1_limit: u32, zone2_limit: u32, safety_buffer: u32) -> Self {
        self.zone1_limit = zone1_limit;
        self.zone2_limit = zone2_limit;
        self.safety_buffer = safety_buffer;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// `GET /subscription/list?output=json`.
    pub async fn fetch_subscriptions(&self, access_token: &str) -> Result<Vec<Subscription>> {
        let path = "/subscription/list";
        let url = format!("{}{}?output=json", self.base_url, path);
        let body = self.get(access_token, path, &url).await?;
        let parsed: SubscriptionListResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Parse(format!("invalid subscription-list response: {e}")))?;
        Ok(parse_subscriptions(parsed))
    }

    /// `GET /stream/contents/<url-encoded-stream-id>?output=json&n=<max>[&c=<cont>]`.
    pub async fn fetch_stream_contents(
        &self,
        access_token: &str,
        stream_id: &str,
        continuation: Option<&str>,
        max: u32,
    ) -> Result<(Vec<Article>, Option<String>)> {
        let encoded_stream_id = urlencode(stream_id);
        let path = format!("/stream/contents/{encoded_stream_id}");
        let mut url = format!(
            "{}{}?output=json&n={}&xt=user/-/state/com.google/read",
            self.base_url, path, max
        );
        if let Some(cont) = continuation.filter(|c| !c.is_empty()) {
            url.push_str("&c=");
            url.push_str(&urlencode(cont));
        }
        let body = self.get(access_token, &path, &url).await?;
        let parsed: StreamContentsResponse = serde_json::from_str(&body)
            .map_err(|e| Error::Parse(format!("invalid stream-contents response: {e}")))?;
        Ok(parse_stream_contents(parsed))
    }

    /// Gates on quota, performs the request with retry/backoff, and records
    /// usage on success.
    async fn get(&self, access_token: &str, zone_path: &str, url: &str) -> Result<String> {
        let zone = classify_endpoint(zone_path);
        self.check_quota(zone).await?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let result = self
                .http
                .get(url)
                .bearer_auth(access_token)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let headers = response.headers().clone();
                        let body = response
                            .text()
                            .await
                            .map_err(|e| Error::Http(format!("failed to read response body: {e}")))?;
                        self.record_success(zone, &headers).await;
                        return Ok(body);
                    }

                    if status.as_u16() == 429 {
                        let retry_after = response
                            .headers()
                            .get("Retry-After")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        return Err(Error::RateLimited {
                            retry_after: Duration::from_secs(retry_after),
                        });
                    }

                    if !is_retryable_status(status.as_u16()) || attempt > self.retry.max_retries {
                        return Err(Error::Http(format!(
                            "request to {url} failed with status {status}"
                        )));
                    }
                    warn!(status = status.as_u16(), attempt, url, "retryable status, backing off");
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                Err(e) if is_retryable_transport_error(&e) && attempt <= self.retry.max_retries => {
                    warn!(error = %e, attempt, url, "transport error, backing off");
                    tokio::time::sleep(self.retry.delay_for(attempt)).await;
                }
                Err(e) => return Err(Error::Http(format!("request to {url} failed: {e}"))),
            }
        }
    }

    async fn check_quota(&self, zone: Zone) -> Result<()> {
        let limit = match zone {
            Zone::Zone1 => self.zone1_limit,
            Zone::Zone2 => self.zone2_limit,
        };
        let existing_snapshot = self.snapshot.read().await.clone();
        let usage = match existing_snapshot {
            Some(snapshot) => match zone {
                Zone::Zone1 => snapshot.zone1_usage,
                Zone::Zone2 => snapshot.zone2_usage,
            },
            None => {
                let today = Utc::now().date_naive();
                let tracking = self
                    .usage_repo
                    .get_or_create_today(today)
                    .await
                    .map_err(|e| Error::Http(format!("failed to read usage tracking: {e}")))?;
                match zone {
                    Zone::Zone1 => tracking.zone1_count,
                    Zone::Zone2 => tracking.zone2_count,
                }
            }
        };
        if !can_issue(usage, limit, self.safety_buffer) {
            debug!(?zone, usage, limit, "refusing request: quota exhausted");
            return Err(Error::RateLimited {
                retry_after: Duration::from_secs(0),
            });
        }
        Ok(())
    }

    async fn record_success(&self, zone: Zone, headers: &reqwest::header::HeaderMap) {
        let previous = self.snapshot.read().await.clone();
        let new_snapshot = parse_header_snapshot(headers, previous);
        if let Some(snapshot) = new_snapshot {
            *self.snapshot.write().await = Some(snapshot);
        }
        let today = Utc::now().date_naive();
        let snapshot_to_persist = self.snapshot.read().await.clone();
        if let Err(e) = self
            .usage_repo
            .record_request(today, zone, snapshot_to_persist)
            .await
        {
            warn!(error = %e, "failed to persist API usage tracking");
        }
        metrics::counter!("reader_api_requests_total", "zone" => zone_label(zone)).increment(1);
    }
}

fn zone_label(zone: Zone) -> &'static str {
    match zone {
        Zone::Zone1 => "zone1",
        Zone::Zone2 => "zone2",
    }
}

fn is_retryable_transport_error(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}
