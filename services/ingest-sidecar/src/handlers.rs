//! RPC surface: Axum handlers over the repository contracts in
//! `ingest-repo`. Page limits clamp to `[1, 500]`, default `200`; empty
//! required IDs return `400`, missing entities `404`, downstream storage
//! failures `500`.

use std::time::Instant;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use chrono::{DateTime, Utc};
use ingest_repo::{Article, ArticleSummary, KeysetCursor, SummaryQuality, clamp_page_size};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, ErrorCode, Result};
use crate::metrics::record_rpc_request;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/articles", get(list_articles_with_tags).post(create_article))
        .route("/articles/deleted", get(list_deleted_articles))
        .route("/articles/incremental", get(list_articles_incremental))
        .route("/articles/untagged", get(list_untagged_articles))
        .route("/articles/latest-timestamp", get(get_latest_article_timestamp))
        .route("/articles/exists/{third_party_item_id}", get(check_article_exists))
        .route("/articles/{id}", get(get_article_by_id))
        .route("/articles/{id}/content", get(get_article_content))
        .route("/articles/{id}/summary", post(save_article_summary))
        .route("/articles/{id}/quality", post(record_summary_quality).get(get_summary_quality))
        .route("/articles/{id}/tags", post(upsert_article_tags))
        .route("/articles/tags/batch", post(batch_upsert_article_tags))
        .route("/subscriptions/feed-id", get(get_feed_id))
        .route("/subscriptions/feed-urls", get(list_feed_urls))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: ErrorCode,
    message: String,
}

fn error_response(err: Error) -> axum::response::Response {
    let status = err.http_status();
    record_rpc_request("error", status.as_u16(), 0.0);
    (
        status,
        axum::Json(ErrorBody {
            code: err.code(),
            message: err.to_string(),
        }),
    )
        .into_response()
}

fn timed<T: Serialize>(label: &str, start: Instant, body: T) -> axum::response::Response {
    record_rpc_request(label, StatusCode::OK.as_u16(), start.elapsed().as_secs_f64());
    (StatusCode::OK, axum::Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page_size: Option<u32>,
    cursor_created_at: Option<DateTime<Utc>>,
    cursor_id: Option<Uuid>,
}

impl ListQuery {
    fn cursor(&self) -> Result<Option<KeysetCursor>> {
        match (self.cursor_created_at, self.cursor_id) {
            (Some(last_created_at), Some(last_id)) => Ok(Some(KeysetCursor { last_created_at, last_id })),
            (None, None) => Ok(None),
            _ => Err(Error::InvalidArgument(
                "cursor_created_at and cursor_id must both be present or both absent".into(),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct ArticlePage<T> {
    items: Vec<T>,
    next_cursor: Option<KeysetCursor>,
}

async fn list_articles_with_tags(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let start = Instant::now();
    let result = async {
        let cursor = query.cursor()?;
        let page_size = clamp_page_size(query.page_size);
        let page = state.article_repo.list_with_tags(cursor, page_size).await?;
        Ok::<_, Error>(ArticlePage {
            items: page.items,
            next_cursor: page.next_cursor,
        })
    }
    .await;

    match result {
        Ok(body) => timed("list_articles_with_tags", start, body),
        Err(err) => error_response(err),
    }
}

async fn list_deleted_articles(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let start = Instant::now();
    let result = async {
        let cursor = query.cursor()?;
        let page_size = clamp_page_size(query.page_size);
        let page = state.article_repo.list_deleted(cursor, page_size).await?;
        Ok::<_, Error>(ArticlePage {
            items: page.items,
            next_cursor: page.next_cursor,
        })
    }
    .await;

    match result {
        Ok(body) => timed("list_deleted_articles", start, body),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct IncrementalQuery {
    since: DateTime<Utc>,
    page_size: Option<u32>,
    cursor_created_at: Option<DateTime<Utc>>,
    cursor_id: Option<Uuid>,
}

async fn list_articles_incremental(
    State(state): State<AppState>,
    Query(query): Query<IncrementalQuery>,
) -> axum::response::Response {
    let start = Instant::now();
    let result = async {
        let cursor = match (query.cursor_created_at, query.cursor_id) {
            (Some(last_created_at), Some(last_id)) => Some(KeysetCursor { last_created_at, last_id }),
            (None, None) => None,
            _ => {
                return Err(Error::InvalidArgument(
                    "cursor_created_at and cursor_id must both be present or both absent".into(),
                ));
            }
        };
        let page_size = clamp_page_size(query.page_size);
        let page = state
            .article_repo
            .list_incremental(query.since, cursor, page_size)
            .await?;
        Ok::<_, Error>(ArticlePage {
            items: page.items,
            next_cursor: page.next_cursor,
        })
    }
    .await;

    match result {
        Ok(body) => timed("list_articles_incremental", start, body),
        Err(err) => error_response(err),
    }
}

async fn list_untagged_articles(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> axum::response::Response {
    let start = Instant::now();
    let result = async {
        let cursor = query.cursor()?;
        let page_size = clamp_page_size(query.page_size);
        let page = state.article_repo.list_untagged(cursor, page_size).await?;
        Ok::<_, Error>(ArticlePage {
            items: page.items,
            next_cursor: page.next_cursor,
        })
    }
    .await;

    match result {
        Ok(body) => timed("list_untagged_articles", start, body),
        Err(err) => error_response(err),
    }
}

async fn get_latest_article_timestamp(State(state): State<AppState>) -> axum::response::Response {
    let start = Instant::now();
    match state.article_repo.get_latest_timestamp().await {
        Ok(ts) => timed("get_latest_article_timestamp", start, serde_json::json!({ "latest": ts })),
        Err(err) => error_response(err.into()),
    }
}

async fn get_article_by_id(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    let start = Instant::now();
    match state.article_repo.get_by_id(id).await {
        Ok(Some(article)) => timed("get_article_by_id", start, article),
        Ok(None) => error_response(Error::NotFound(format!("article {id} not found"))),
        Err(err) => error_response(err.into()),
    }
}

async fn check_article_exists(
    State(state): State<AppState>,
    Path(third_party_item_id): Path<String>,
) -> axum::response::Response {
    let start = Instant::now();
    if third_party_item_id.is_empty() {
        return error_response(Error::InvalidArgument("third_party_item_id must be non-empty".into()));
    }
    match state.article_repo.exists(&third_party_item_id).await {
        Ok(exists) => timed("check_article_exists", start, serde_json::json!({ "exists": exists })),
        Err(err) => error_response(err.into()),
    }
}

async fn get_article_content(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    let start = Instant::now();
    match state.article_repo.get_content(id).await {
        Ok(Some(content)) => timed("get_article_content", start, serde_json::json!({ "content": content })),
        Ok(None) => error_response(Error::NotFound(format!("content for article {id} not found"))),
        Err(err) => error_response(err.into()),
    }
}

#[derive(Debug, Deserialize)]
struct CreateArticleRequest {
    third_party_item_id: String,
    subscription_id: Uuid,
    url: String,
    title: String,
    author: String,
    #[serde(default)]
    content: Option<String>,
    published_at: Option<DateTime<Utc>>,
}

async fn create_article(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<CreateArticleRequest>,
) -> axum::response::Response {
    let start = Instant::now();
    if body.third_party_item_id.is_empty() {
        return error_response(Error::InvalidArgument(
            "third_party_item_id must be non-empty".into(),
        ));
    }

    let article = Article {
        id: Uuid::new_v4(),
        third_party_item_id: body.third_party_item_id.clone(),
        subscription_id: Some(body.subscription_id),
        origin_stream_id: None,
        url: body.url,
        title: body.title,
        author: body.author,
        content: body.content,
        published_at: body.published_at,
        fetched_at: Utc::now(),
        processed: false,
        deleted_at: None,
    };

    match state.article_repo.create(article).await {
        Ok(created) => {
            state.event_publisher.publish(ingest::ArticleCreated {
                article_id: created.id,
                subscription_id: body.subscription_id,
                third_party_item_id: body.third_party_item_id,
                title: created.title.clone(),
                url: created.url.clone(),
                content: created.content.clone(),
                published_at: created.published_at,
            });
            timed("create_article", start, created)
        }
        Err(err) => error_response(err.into()),
    }
}

#[derive(Debug, Deserialize)]
struct SaveSummaryRequest {
    summary: String,
    model: Option<String>,
}

async fn save_article_summary(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    axum::Json(body): axum::Json<SaveSummaryRequest>,
) -> axum::response::Response {
    let start = Instant::now();
    if body.summary.is_empty() {
        return error_response(Error::InvalidArgument("summary must be non-empty".into()));
    }
    let summary = ArticleSummary {
        article_id: id,
        summary: body.summary,
        model: body.model,
        created_at: Utc::now(),
    };
    match state.summary_quality_repo.save_summary(summary).await {
        Ok(()) => timed("save_article_summary", start, serde_json::json!({ "status": "saved" })),
        Err(err) => error_response(err.into()),
    }
}

#[derive(Debug, Deserialize)]
struct RecordQualityRequest {
    score: f64,
    reviewed: bool,
    notes: Option<String>,
}

async fn record_summary_quality(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    axum::Json(body): axum::Json<RecordQualityRequest>,
) -> axum::response::Response {
    let start = Instant::now();
    let quality = SummaryQuality {
        article_id: id,
        score: body.score,
        reviewed: body.reviewed,
        notes: body.notes,
    };
    match state.summary_quality_repo.record_quality(quality).await {
        Ok(()) => timed("record_summary_quality", start, serde_json::json!({ "status": "recorded" })),
        Err(err) => error_response(err.into()),
    }
}

async fn get_summary_quality(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> axum::response::Response {
    let start = Instant::now();
    match state.summary_quality_repo.get_quality(id).await {
        Ok(Some(quality)) => timed("get_summary_quality", start, quality),
        Ok(None) => error_response(Error::NotFound(format!("quality record for article {id} not found"))),
        Err(err) => error_response(err.into()),
    }
}

#[derive(Debug, Deserialize)]
struct UpsertTagsRequest {
    tags: Vec<String>,
}

async fn upsert_article_tags(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    axum::Json(body): axum::Json<UpsertTagsRequest>,
) -> axum::response::Response {
    let start = Instant::now();
    match state.tag_repo.upsert_tags(id, body.tags).await {
        Ok(()) => timed("upsert_article_tags", start, serde_json::json!({ "status": "upserted" })),
        Err(err) => error_response(err.into()),
    }
}

#[derive(Debug, Deserialize)]
struct BatchUpsertTagsRequest {
    updates: Vec<(Uuid, Vec<String>)>,
}

async fn batch_upsert_article_tags(
    State(state): State<AppState>,
    axum::Json(body): axum::Json<BatchUpsertTagsRequest>,
) -> axum::response::Response {
    let start = Instant::now();
    match state.tag_repo.batch_upsert_tags(body.updates).await {
        Ok(count) => timed("batch_upsert_article_tags", start, serde_json::json!({ "updated": count })),
        Err(err) => error_response(err.into()),
    }
}

#[derive(Debug, Deserialize)]
struct FeedIdQuery {
    stream_id: String,
}

async fn get_feed_id(
    State(state): State<AppState>,
    Query(query): Query<FeedIdQuery>,
) -> axum::response::Response {
    let start = Instant::now();
    if query.stream_id.is_empty() {
        return error_response(Error::InvalidArgument("stream_id must be non-empty".into()));
    }
    match state.subscription_repo.get_feed_id(&query.stream_id).await {
        Ok(Some(id)) => timed("get_feed_id", start, serde_json::json!({ "feed_id": id })),
        Ok(None) => error_response(Error::NotFound(format!("no subscription for stream_id {}", query.stream_id))),
        Err(err) => error_response(err.into()),
    }
}

async fn list_feed_urls(State(state): State<AppState>) -> axum::response::Response {
    let start = Instant::now();
    match state.subscription_repo.list_feed_urls().await {
        Ok(urls) => timed("list_feed_urls", start, serde_json::json!({ "feed_urls": urls })),
        Err(err) => error_response(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use ingest_repo::mem::{
        InMemoryArticleRepository, InMemorySubscriptionRepository, InMemorySummaryQualityRepository,
        InMemoryTagRepository,
    };
    use ingest::NullEventPublisher;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        AppState {
            article_repo: Arc::new(InMemoryArticleRepository::new()),
            subscription_repo: Arc::new(InMemorySubscriptionRepository::new()),
            tag_repo: Arc::new(InMemoryTagRepository::new()),
            summary_quality_repo: Arc::new(InMemorySummaryQualityRepository::new()),
            event_publisher: Arc::new(NullEventPublisher),
            started_at: Instant::now(),
        }
    }

    #[tokio::test]
    async fn create_article_then_get_by_id_round_trips() {
        let state = test_state();
        let app = build_router(state.clone());

        let create_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/articles")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "third_party_item_id": "item-1",
                            "subscription_id": Uuid::new_v4(),
                            "url": "http://example.com/a",
                            "title": "Title",
                            "author": "Author",
                            "published_at": null
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(create_response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(create_response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let created: Article = serde_json::from_slice(&body).unwrap();

        let get_response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/articles/{}", created.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(get_response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_article_content_returns_saved_body() {
        let state = test_state();
        let app = build_router(state.clone());

        let create_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/articles")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "third_party_item_id": "item-1",
                            "subscription_id": Uuid::new_v4(),
                            "url": "http://example.com/a",
                            "title": "Title",
                            "author": "Author",
                            "content": "full article body",
                            "published_at": null
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = axum::body::to_bytes(create_response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let created: Article = serde_json::from_slice(&body).unwrap();

        let content_response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/articles/{}/content", created.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(content_response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(content_response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["content"], "full article body");
    }

    #[tokio::test]
    async fn get_article_by_id_missing_returns_404() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/articles/{}", Uuid::new_v4()))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_article_with_empty_item_id_returns_400() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/articles")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "third_party_item_id": "",
                            "subscription_id": Uuid::new_v4(),
                            "url": "http://example.com/a",
                            "title": "Title",
                            "author": "Author",
                            "published_at": null
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_feed_urls_returns_empty_for_fresh_repo() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/subscriptions/feed-urls")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["feed_urls"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn get_feed_id_with_empty_stream_id_returns_400() {
        let app = build_router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/subscriptions/feed-id?stream_id=")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
