//! Repository contracts consumed by the fetch orchestrator and the
//! downstream RPC surface, plus the domain model they share.
//!
//! This crate specifies the data-access boundary only: `SubscriptionRepository`,
//! `ArticleRepository`, `SyncStateRepository`, `ApiUsageRepository`,
//! `TagRepository`, and `SummaryQualityRepository` are traits. An in-memory
//! implementation ([`mem`]) backs unit tests; a SQLite implementation
//! ([`sqlite`]) backs local runs. The production backing store is an
//! external concern.

pub mod error;
pub mod mem;
pub mod model;
pub mod repo;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{Error, Result};
pub use model::{
    Article, ApiUsageTracking, ArticleSummary, DEFAULT_PAGE_SIZE, HeaderSnapshot, KeysetCursor,
    PAGE_SIZE_BOUNDS, ResolutionError, ResolutionErrorCode, Subscription, SummaryQuality,
    SyncState, Tag, Zone, clamp_page_size,
};
pub use repo::{
    ApiUsageRepository, ArticleRepository, Page, SubscriptionRepository, SummaryQualityRepository,
    SyncStateRepository, TagRepository,
};
