//! Repository trait contracts.
//!
//! Traits use `Pin<Box<dyn Future>>` return types (rather than `async fn` in
//! a trait) so they stay dyn-compatible: every component holds its
//! repositories as `Arc<dyn ...Repository>`.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::model::{
    Article, ApiUsageTracking, ArticleSummary, KeysetCursor, Subscription, SummaryQuality,
    SyncState, Tag, Zone,
};

type Fut<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// A page of results plus the cursor to continue from, if any.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<KeysetCursor>,
}

pub trait SubscriptionRepository: Send + Sync {
    /// Looks up a subscription by its third-party stream ID.
    fn find_by_stream_id<'a>(&'a self, stream_id: &'a str) -> Fut<'a, Option<Subscription>>;

    /// Creates a new subscription. Fails with `Error::UniquenessViolation` if
    /// `stream_id` is already taken (a benign race during auto-create).
    fn create<'a>(&'a self, subscription: Subscription) -> Fut<'a, Subscription>;

    fn get_by_id<'a>(&'a self, id: Uuid) -> Fut<'a, Option<Subscription>>;

    fn list_feed_urls<'a>(&'a self) -> Fut<'a, Vec<String>>;

    fn get_feed_id<'a>(&'a self, stream_id: &'a str) -> Fut<'a, Option<Uuid>>;
}

pub trait ArticleRepository: Send + Sync {
    fn exists<'a>(&'a self, third_party_item_id: &'a str) -> Fut<'a, bool>;

    fn get_by_id<'a>(&'a self, id: Uuid) -> Fut<'a, Option<Article>>;

    /// Inserts articles in a single call, each in its own transaction so one
    /// failure does not cascade. Returns the count actually created;
    /// duplicates of an existing `third_party_item_id` are silently skipped
    /// (idempotent re-ingestion of the same continuation page).
    fn batch_insert<'a>(&'a self, articles: Vec<Article>) -> Fut<'a, usize>;

    fn create<'a>(&'a self, article: Article) -> Fut<'a, Article>;

    fn get_content<'a>(&'a self, id: Uuid) -> Fut<'a, Option<String>>;

    fn list_with_tags<'a>(
        &'a self,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> Fut<'a, Page<(Article, Vec<Tag>)>>;

    fn list_deleted<'a>(
        &'a self,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> Fut<'a, Page<Article>>;

    fn list_incremental<'a>(
        &'a self,
        incremental_mark: DateTime<Utc>,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> Fut<'a, Page<Article>>;

    fn get_latest_timestamp<'a>(&'a self) -> Fut<'a, Option<DateTime<Utc>>>;

    fn list_untagged<'a>(
        &'a self,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> Fut<'a, Page<Article>>;
}

pub trait TagRepository: Send + Sync {
    fn upsert_tags<'a>(&'a self, article_id: Uuid, tags: Vec<String>) -> Fut<'a, ()>;

    fn batch_upsert_tags<'a>(
        &'a self,
        updates: Vec<(Uuid, Vec<String>)>,
    ) -> Fut<'a, usize>;

    fn list_for_article<'a>(&'a self, article_id: Uuid) -> Fut<'a, Vec<Tag>>;
}

pub trait SummaryQualityRepository: Send + Sync {
    fn save_summary<'a>(&'a self, summary: ArticleSummary) -> Fut<'a, ()>;

    fn get_summary<'a>(&'a self, article_id: Uuid) -> Fut<'a, Option<ArticleSummary>>;

    fn record_quality<'a>(&'a self, quality: SummaryQuality) -> Fut<'a, ()>;

    fn get_quality<'a>(&'a self, article_id: Uuid) -> Fut<'a, Option<SummaryQuality>>;
}

pub trait SyncStateRepository: Send + Sync {
    fn get<'a>(&'a self, stream_id: &'a str) -> Fut<'a, Option<SyncState>>;

    /// Creates or updates the sync state for a stream. Failures here are
    /// recorded as soft errors by the caller; articles are already
    /// committed by the time this is called.
    fn upsert<'a>(&'a self, state: SyncState) -> Fut<'a, ()>;
}

pub trait ApiUsageRepository: Send + Sync {
    /// Returns today's tracking row (in the configured timezone), creating
    /// an empty one if absent.
    fn get_or_create_today<'a>(&'a self, date: chrono::NaiveDate) -> Fut<'a, ApiUsageTracking>;

    /// Increments the counter for `zone` and records the latest header
    /// snapshot if one is given.
    fn record_request<'a>(
        &'a self,
        date: chrono::NaiveDate,
        zone: Zone,
        header_snapshot: Option<crate::model::HeaderSnapshot>,
    ) -> Fut<'a, ApiUsageTracking>;
}
