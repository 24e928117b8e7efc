//! Event publication for downstream-created articles.
//!
//! Only the RPC-side `create_article` write path publishes; the ingestion
//! path (`FetchOrchestrator::fetch_articles`) never does.

use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ArticleCreated {
    pub article_id: Uuid,
    pub subscription_id: Uuid,
    pub third_party_item_id: String,
    pub title: String,
    pub url: String,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// Fire-and-forget publication hook. Implementations are expected to be
/// non-blocking (e.g. backed by a channel) — this is called from request
/// handlers, not background tasks.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: ArticleCreated);
}

/// No-op publisher used when no event sink is configured.
pub struct NullEventPublisher;

impl EventPublisher for NullEventPublisher {
    fn publish(&self, _event: ArticleCreated) {}
}
