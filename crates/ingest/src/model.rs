//! Result type returned by a single `fetch_articles` call.

use std::time::Duration;

use chrono::{DateTime, Utc};
use ingest_repo::ResolutionError;

/// Outcome of one `fetch_articles` call. `errors` aggregates both
/// per-article resolution failures and a soft-failed sync-state update; it
/// never includes the reason the call itself returned `Err`.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub new_articles: usize,
    pub total_processed: usize,
    pub continuation_token: Option<String>,
    pub sync_time: DateTime<Utc>,
    pub duration: Duration,
    pub resolution_errors: Vec<ResolutionError>,
    pub errors: Vec<String>,
}
