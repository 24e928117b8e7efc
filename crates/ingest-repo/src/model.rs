//! Domain model shared by the ingestion path and the downstream RPC surface.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A feed the sidecar polls for articles.
///
/// `stream_id` is the third-party identity (e.g. `feed/http://example.com/rss`)
/// and is unique; `id` is the internal identity and is immutable once assigned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Subscription {
    pub id: Uuid,
    pub stream_id: String,
    pub feed_url: String,
    pub title: String,
    pub category: String,
    pub synced_at: DateTime<Utc>,
}

/// A single fetched article.
///
/// `subscription_id` and `origin_stream_id` model the resolution handoff
/// described in the ingestion pipeline: a freshly parsed article carries
/// `origin_stream_id` and no `subscription_id`; once resolution assigns a
/// subscription, `origin_stream_id` is cleared. A repository must reject an
/// insert where `subscription_id` is still `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: Uuid,
    pub third_party_item_id: String,
    pub subscription_id: Option<Uuid>,
    pub origin_stream_id: Option<String>,
    pub url: String,
    pub title: String,
    pub author: String,
    /// Full article body, when known. The reader API's stream-contents
    /// listing never carries this (titles/metadata only); it is populated
    /// by the downstream `create_article` write path and served back
    /// through `get_article_content`.
    #[serde(default)]
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub processed: bool,
    /// Soft-delete marker consumed by the downstream `list_deleted_articles`
    /// RPC path; the ingestion path never sets this.
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Article {
    /// Whether this article is ready to persist: resolved to a subscription
    /// and with its transient origin field cleared.
    pub fn is_resolved(&self) -> bool {
        self.subscription_id.is_some() && self.origin_stream_id.is_none()
    }
}

/// Per-stream fetch progress: the continuation cursor and the last time a
/// page was committed for this stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncState {
    pub stream_id: String,
    pub continuation_token: String,
    pub last_sync: DateTime<Utc>,
}

/// Snapshot of the most recently observed reader-API rate-limit headers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct HeaderSnapshot {
    pub zone1_usage: u32,
    pub zone1_limit: u32,
    pub zone1_remaining: u32,
    pub zone2_usage: u32,
    pub zone2_limit: u32,
    pub zone2_remaining: u32,
}

/// One calendar day's worth of API usage, in the configured timezone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiUsageTracking {
    pub date: NaiveDate,
    pub zone1_count: u32,
    pub zone2_count: u32,
    pub last_header_snapshot: Option<HeaderSnapshot>,
}

/// Which reader-API quota zone a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    Zone1,
    Zone2,
}

/// Per-article UUID resolution failure, aggregated on a fetch result and
/// never fatal to the batch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionError {
    pub third_party_item_id: String,
    pub origin_stream_id: String,
    pub code: ResolutionErrorCode,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionErrorCode {
    NotFound,
    AutoCreateFailed,
    PersistenceError,
}

/// A user-assigned tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
}

/// A generated summary for an article's content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArticleSummary {
    pub article_id: Uuid,
    pub summary: String,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A quality assessment recorded against a previously saved summary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SummaryQuality {
    pub article_id: Uuid,
    pub score: f64,
    pub reviewed: bool,
    pub notes: Option<String>,
}

/// Keyset pagination cursor: `(last_created_at, last_id)`, per the RPC
/// surface's cursor contract.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeysetCursor {
    pub last_created_at: DateTime<Utc>,
    pub last_id: Uuid,
}

/// Default page size for cursor-paginated list operations.
pub const DEFAULT_PAGE_SIZE: u32 = 200;
/// Inclusive bounds page sizes are clamped to.
pub const PAGE_SIZE_BOUNDS: (u32, u32) = (1, 500);

/// Clamp a caller-supplied page size into the allowed range, defaulting when
/// zero/absent.
pub fn clamp_page_size(requested: Option<u32>) -> u32 {
    let (min, max) = PAGE_SIZE_BOUNDS;
    requested.unwrap_or(DEFAULT_PAGE_SIZE).clamp(min, max)
}
