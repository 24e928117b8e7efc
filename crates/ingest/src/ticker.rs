//! Rotation-mode ticker: on each tick, ask the rotation scheduler for the
//! next subscription and run one fetch for it.

use std::sync::Arc;
use std::time::Duration;

use ingest_repo::SubscriptionRepository;
use rotation::RotationScheduler;
use tracing::{debug, error, info, warn};

use crate::orchestrator::FetchOrchestrator;

/// Metric name shared with the service binary's histogram bucket config
/// (`ingest_fetch_duration_seconds`), so fetch-cycle timing from both the
/// rotation ticker and any direct RPC-triggered fetch land in the same
/// histogram.
const FETCH_DURATION_METRIC: &str = "ingest_fetch_duration_seconds";

/// Spawns the rotation/fetch tick loop. Returns a `JoinHandle` the caller
/// can abort on shutdown.
pub fn spawn_rotation_ticker(
    scheduler: Arc<RotationScheduler>,
    orchestrator: Arc<FetchOrchestrator>,
    subscription_repo: Arc<dyn SubscriptionRepository>,
    max_articles_per_fetch: u32,
    tick_interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(tick_interval);
        loop {
            ticker.tick().await;
            if !scheduler.is_ready_for_next().await {
                continue;
            }
            run_tick(&scheduler, &orchestrator, &subscription_repo, max_articles_per_fetch).await;
        }
    })
}

async fn run_tick(
    scheduler: &RotationScheduler,
    orchestrator: &FetchOrchestrator,
    subscription_repo: &Arc<dyn SubscriptionRepository>,
    max_articles_per_fetch: u32,
) {
    let Some(subscription_id) = scheduler.get_next().await else {
        debug!("rotation: no subscription ready (daily quota exhausted)");
        return;
    };

    let subscription = match subscription_repo.get_by_id(subscription_id).await {
        Ok(Some(sub)) => sub,
        Ok(None) => {
            warn!(%subscription_id, "rotation selected a subscription missing from the repository");
            return;
        }
        Err(e) => {
            error!(%subscription_id, error = %e, "failed to load subscription for rotation tick");
            return;
        }
    };

    match orchestrator
        .fetch_articles(&subscription.stream_id, max_articles_per_fetch)
        .await
    {
        Ok(result) => {
            metrics::histogram!(FETCH_DURATION_METRIC, "stream_id" => subscription.stream_id.clone())
                .record(result.duration.as_secs_f64());
            info!(
                stream_id = %subscription.stream_id,
                new_articles = result.new_articles,
                total_processed = result.total_processed,
                resolution_errors = result.resolution_errors.len(),
                "rotation fetch completed"
            );
        }
        Err(e) => {
            error!(stream_id = %subscription.stream_id, error = %e, "rotation fetch failed");
        }
    }
}
