//! Shared application state handed to every RPC handler.

use std::sync::Arc;
use std::time::Instant;

use ingest_repo::{
    ArticleRepository, SubscriptionRepository, SummaryQualityRepository, TagRepository,
};

use ingest::EventPublisher;

#[derive(Clone)]
pub struct AppState {
    pub article_repo: Arc<dyn ArticleRepository>,
    pub subscription_repo: Arc<dyn SubscriptionRepository>,
    pub tag_repo: Arc<dyn TagRepository>,
    pub summary_quality_repo: Arc<dyn SummaryQualityRepository>,
    pub event_publisher: Arc<dyn EventPublisher>,
    pub started_at: Instant,
}
