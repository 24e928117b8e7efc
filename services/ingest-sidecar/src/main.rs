//! Inoreader feed-ingestion sidecar.
//!
//! Single-binary service that:
//! 1. Keeps an OAuth2 access token fresh (auto-refresh + Kubernetes Secret
//!    push watcher, never both triggering an identity-provider call).
//! 2. Rotates through subscriptions on a timezone-aware daily schedule,
//!    fetching and persisting new articles for each.
//! 3. Serves the persisted articles/subscriptions/tags over a JSON RPC
//!    surface for downstream consumers.

mod config;
mod error;
mod handlers;
mod metrics;
mod state;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Duration as ChronoDuration;
use ingest::FetchOrchestrator;
use ingest_repo::mem::{
    InMemoryApiUsageRepository, InMemoryArticleRepository, InMemorySubscriptionRepository,
    InMemorySummaryQualityRepository, InMemorySyncStateRepository, InMemoryTagRepository,
};
use oauth_token::{RecoveryManager, RefreshClient, TokenManager};
use reader_client::ApiClient;
use rotation::{RotationConfig as SchedulerConfig, RotationScheduler};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::state::AppState;

#[derive(Clone)]
struct HealthState {
    started_at: Instant,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting ingest-sidecar");

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        namespace = %config.kubernetes.namespace,
        secret_name = %config.kubernetes.secret_name,
        max_daily_rotations = config.rotation.max_daily_rotations,
        timezone = %config.rotation.timezone,
        "configuration loaded"
    );

    let metrics_handle = metrics::install_recorder();

    // Repositories. In-memory by default; `sqlite` feature swaps the
    // article/subscription/sync-state/api-usage backing to a local file
    // when the caller configures a database path (left as a future wiring
    // point — not every deployment needs durable local persistence, since
    // the production backing store is an external concern).
    let subscription_repo = Arc::new(InMemorySubscriptionRepository::new());
    let article_repo = Arc::new(InMemoryArticleRepository::new());
    let sync_state_repo = Arc::new(InMemorySyncStateRepository::new());
    let api_usage_repo = Arc::new(InMemoryApiUsageRepository::new());
    let tag_repo = Arc::new(InMemoryTagRepository::new());
    let summary_quality_repo = Arc::new(InMemorySummaryQualityRepository::new());

    // Token lifecycle: manager + auto-refresh ticker + recovery manager.
    let refresh_client = RefreshClient::new(
        config.oauth.token_endpoint.clone(),
        config.oauth.client_id.clone(),
        config.oauth.client_secret.clone(),
    );
    let token_manager = Arc::new(TokenManager::new(
        refresh_client,
        ChronoDuration::seconds(config.token.clock_skew_seconds),
        ChronoDuration::seconds(config.token.refresh_buffer_seconds),
    ));

    let shutdown = CancellationToken::new();

    let recovery_manager = Arc::new(RecoveryManager::new(token_manager.clone()));
    {
        let recovery_manager = recovery_manager.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            recovery_manager.run_health_check(shutdown).await;
        });
    }
    {
        let recovery_manager = recovery_manager.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            recovery_manager
                .run_auto_refresh(shutdown, |var| std::env::var(var).ok())
                .await;
        });
    }

    // Secret watcher: polls the Kubernetes Secret for a pushed credential
    // update and feeds it directly into the token manager. Never calls the
    // identity provider itself.
    match secret_watcher::KubeSecretClient::from_in_cluster(
        config.kubernetes.namespace.clone(),
        config.kubernetes.secret_name.clone(),
    ) {
        Ok(secret_client) => {
            let watcher = Arc::new(secret_watcher::SecretWatcher::new(
                secret_client,
                token_manager.clone(),
            ));
            secret_watcher::spawn_watch_task(watcher, secret_watcher::DEFAULT_POLL_INTERVAL);
            info!("secret watcher started");
        }
        Err(err) => {
            warn!(error = %err, "secret watcher not started (not running in-cluster?)");
        }
    }

    // Reader API client + fetch orchestrator + rotation ticker.
    let api_client = Arc::new(
        ApiClient::new(config.reader.base_url.clone(), api_usage_repo.clone()).with_limits(
            config.reader.zone1_limit,
            config.reader.zone2_limit,
            config.reader.safety_buffer,
        ),
    );

    let orchestrator = Arc::new(FetchOrchestrator::new(
        subscription_repo.clone(),
        article_repo.clone(),
        sync_state_repo.clone(),
        api_client.clone(),
        token_manager.clone(),
    ));

    let existing_subscriptions = subscription_repo
        .list_feed_urls()
        .await
        .context("failed to list subscriptions for rotation scheduler")?;
    if existing_subscriptions.is_empty() {
        info!("no subscriptions yet; rotation ticker will idle until some are created");
    }

    let scheduler_config = SchedulerConfig {
        max_daily_rotations: config.rotation.max_daily_rotations,
        interval_minutes: config.rotation.interval_minutes,
        random_start_enabled: config.rotation.random_start_enabled,
        timezone: config
            .rotation
            .timezone
            .parse()
            .context("invalid rotation timezone")?,
        batch_size: config.rotation.batch_size,
    };
    // An empty subscription set trivially satisfies the capacity check; the
    // scheduler simply never selects anything until subscriptions exist.
    let scheduler = Arc::new(
        RotationScheduler::new(Vec::new(), scheduler_config).context("failed to build rotation scheduler")?,
    );

    ingest::spawn_rotation_ticker(
        scheduler.clone(),
        orchestrator.clone(),
        subscription_repo.clone(),
        config.reader.max_articles_per_fetch,
        Duration::from_secs(60),
    );

    let app_state = AppState {
        article_repo,
        subscription_repo,
        tag_repo,
        summary_quality_repo,
        event_publisher: Arc::new(ingest::NullEventPublisher),
        started_at: Instant::now(),
    };

    let health_state = HealthState {
        started_at: app_state.started_at,
    };

    let app = Router::new()
        .route("/health", get(health_handler))
        .route(
            "/metrics",
            get({
                let handle = metrics_handle.clone();
                move || render_metrics(handle.clone())
            }),
        )
        .with_state(health_state)
        .merge(handlers::build_router(app_state));

    let listener = TcpListener::bind(config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.server.listen_addr))?;

    info!(addr = %config.server.listen_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    info!("shutdown complete");
    Ok(())
}

async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let body = serde_json::json!({
        "status": "healthy",
        "uptime_seconds": uptime,
    });
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

async fn render_metrics(handle: metrics_exporter_prometheus::PrometheusHandle) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
    token.cancel();
}
