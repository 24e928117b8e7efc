//! Fetch orchestrator: one page per call, UUID resolution, idempotent
//! persistence.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ingest_repo::{
    ArticleRepository, ResolutionError, ResolutionErrorCode, Subscription, SubscriptionRepository,
    SyncState, SyncStateRepository,
};
use oauth_token::TokenManager;
use reader_client::ApiClient;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::model::FetchResult;

/// Fetches one page of articles for a stream, resolves each article's
/// origin to a subscription UUID (auto-creating on unknown), and
/// idempotently persists them. One in-flight fetch at a time per instance.
pub struct FetchOrchestrator {
    subscription_repo: Arc<dyn SubscriptionRepository>,
    article_repo: Arc<dyn ArticleRepository>,
    sync_state_repo: Arc<dyn SyncStateRepository>,
    api_client: Arc<ApiClient>,
    token_manager: Arc<TokenManager>,
    lock: Mutex<()>,
}

impl FetchOrchestrator {
    pub fn new(
        subscription_repo: Arc<dyn SubscriptionRepository>,
        article_repo: Arc<dyn ArticleRepository>,
        sync_state_repo: Arc<dyn SyncStateRepository>,
        api_client: Arc<ApiClient>,
        token_manager: Arc<TokenManager>,
    ) -> Self {
        Self {
            subscription_repo,
            article_repo,
            sync_state_repo,
            api_client,
            token_manager,
            lock: Mutex::new(()),
        }
    }

    pub async fn fetch_articles(&self, stream_id: &str, max: u32) -> Result<FetchResult> {
        let _guard = self.lock.lock().await;
        let start = Instant::now();

        let continuation = self
            .sync_state_repo
            .get(stream_id)
            .await?
            .map(|state| state.continuation_token)
            .filter(|token| !token.is_empty());

        let token = self.token_manager.get_valid_token().await?;
        let (raw_articles, next_continuation) = self
            .api_client
            .fetch_stream_contents(&token.access_token, stream_id, continuation.as_deref(), max)
            .await?;
        let total_processed = raw_articles.len();

        let mut resolved_articles = Vec::with_capacity(total_processed);
        let mut resolution_errors = Vec::new();
        for mut article in raw_articles {
            let Some(origin) = article.origin_stream_id.clone() else {
                resolved_articles.push(article);
                continue;
            };
            match self.resolve_subscription(&origin).await {
                Ok(subscription_id) => {
                    article.subscription_id = Some(subscription_id);
                    article.origin_stream_id = None;
                    resolved_articles.push(article);
                }
                Err(code) => {
                    warn!(origin_stream_id = %origin, ?code, "article resolution failed, skipping");
                    resolution_errors.push(ResolutionError {
                        third_party_item_id: article.third_party_item_id,
                        origin_stream_id: origin,
                        code,
                    });
                }
            }
        }

        let resolved_count = resolved_articles.len();
        let created_count = self.article_repo.batch_insert(resolved_articles).await?;
        metrics::counter!("ingest_articles_created_total").increment(created_count as u64);
        if created_count < resolved_count {
            info!(
                skipped = resolved_count - created_count,
                "batch insert skipped already-known articles"
            );
        }

        let mut errors = Vec::new();
        let sync_time = Utc::now();
        let sync_state = SyncState {
            stream_id: stream_id.to_string(),
            continuation_token: next_continuation.clone().unwrap_or_default(),
            last_sync: sync_time,
        };
        if let Err(e) = self.sync_state_repo.upsert(sync_state).await {
            warn!(error = %e, stream_id, "sync state update failed, articles already persisted");
            errors.push(format!("sync state update failed: {e}"));
        }

        Ok(FetchResult {
            new_articles: created_count,
            total_processed,
            continuation_token: next_continuation,
            sync_time,
            duration: start.elapsed(),
            resolution_errors,
            errors,
        })
    }

    /// Resolves `origin_stream_id` to a subscription UUID, auto-creating the
    /// subscription if it doesn't exist yet. A uniqueness violation on
    /// create (a concurrent fetch won the race) is retried once via lookup.
    async fn resolve_subscription(&self, origin_stream_id: &str) -> std::result::Result<Uuid, ResolutionErrorCode> {
        match self.subscription_repo.find_by_stream_id(origin_stream_id).await {
            Ok(Some(sub)) => return Ok(sub.id),
            Ok(None) => {}
            Err(_) => return Err(ResolutionErrorCode::PersistenceError),
        }

        let feed_url = origin_stream_id
            .strip_prefix("feed/")
            .unwrap_or(origin_stream_id)
            .to_string();
        let new_subscription = Subscription {
            id: Uuid::new_v4(),
            stream_id: origin_stream_id.to_string(),
            feed_url: feed_url.clone(),
            title: format!("Auto-created: {feed_url}"),
            category: String::new(),
            synced_at: Utc::now(),
        };

        match self.subscription_repo.create(new_subscription).await {
            Ok(created) => Ok(created.id),
            Err(ingest_repo::Error::UniquenessViolation(_)) => {
                match self.subscription_repo.find_by_stream_id(origin_stream_id).await {
                    Ok(Some(sub)) => Ok(sub.id),
                    Ok(None) => Err(ResolutionErrorCode::NotFound),
                    Err(_) => Err(ResolutionErrorCode::PersistenceError),
                }
            }
            Err(_) => Err(ResolutionErrorCode::AutoCreateFailed),
        }
    }
}
