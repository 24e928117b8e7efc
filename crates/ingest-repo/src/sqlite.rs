//! SQLite-backed repository implementations for local runs.
//!
//! Not the production backing store — this exists so the sidecar binary has
//! something real to run against outside of tests. Schema is created
//! idempotently on connect; no migration framework, matching the scale of
//! this store.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Article, ApiUsageTracking, HeaderSnapshot, KeysetCursor, Subscription, SyncState, Zone,
};
use crate::repo::{ApiUsageRepository, ArticleRepository, Page, SubscriptionRepository, SyncStateRepository};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subscriptions (
    id TEXT PRIMARY KEY,
    stream_id TEXT NOT NULL UNIQUE,
    feed_url TEXT NOT NULL,
    title TEXT NOT NULL,
    category TEXT NOT NULL,
    synced_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS articles (
    id TEXT PRIMARY KEY,
    third_party_item_id TEXT NOT NULL UNIQUE,
    subscription_id TEXT NOT NULL,
    url TEXT NOT NULL,
    title TEXT NOT NULL,
    author TEXT NOT NULL,
    content TEXT,
    published_at TEXT,
    fetched_at TEXT NOT NULL,
    processed INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS sync_state (
    stream_id TEXT PRIMARY KEY,
    continuation_token TEXT NOT NULL,
    last_sync TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS api_usage (
    date TEXT PRIMARY KEY,
    zone1_count INTEGER NOT NULL DEFAULT 0,
    zone2_count INTEGER NOT NULL DEFAULT 0,
    last_header_snapshot TEXT
);
"#;

/// Opens (creating if absent) a SQLite-backed repository set at `path`.
pub async fn connect(path: &str) -> Result<SqlitePool> {
    let url = format!("sqlite://{path}?mode=rwc");
    let pool = SqlitePool::connect(&url)
        .await
        .map_err(|e| Error::Storage(format!("failed to open sqlite db at {path}: {e}")))?;
    sqlx::query(SCHEMA)
        .execute(&pool)
        .await
        .map_err(|e| Error::Storage(format!("failed to apply schema: {e}")))?;
    Ok(pool)
}

/// SQLite-backed [`SubscriptionRepository`].
pub struct SqliteSubscriptionRepository {
    pool: SqlitePool,
}

impl SqliteSubscriptionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_subscription(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Subscription> {
    Ok(Subscription {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        stream_id: row.try_get("stream_id")?,
        feed_url: row.try_get("feed_url")?,
        title: row.try_get("title")?,
        category: row.try_get("category")?,
        synced_at: row
            .try_get::<String, _>("synced_at")?
            .parse::<DateTime<Utc>>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
    })
}

impl SubscriptionRepository for SqliteSubscriptionRepository {
    fn find_by_stream_id<'a>(
        &'a self,
        stream_id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Subscription>>> + Send + 'a>>
    {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM subscriptions WHERE stream_id = ?")
                .bind(stream_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            row.as_ref()
                .map(row_to_subscription)
                .transpose()
                .map_err(|e| Error::Storage(e.to_string()))
        })
    }

    fn create<'a>(
        &'a self,
        subscription: Subscription,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Subscription>> + Send + 'a>>
    {
        Box::pin(async move {
            let result = sqlx::query(
                "INSERT INTO subscriptions (id, stream_id, feed_url, title, category, synced_at) VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(subscription.id.to_string())
            .bind(&subscription.stream_id)
            .bind(&subscription.feed_url)
            .bind(&subscription.title)
            .bind(&subscription.category)
            .bind(subscription.synced_at.to_rfc3339())
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(subscription),
                Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                    Err(Error::UniquenessViolation(format!(
                        "stream_id {} already exists",
                        subscription.stream_id
                    )))
                }
                Err(e) => Err(Error::Storage(e.to_string())),
            }
        })
    }

    fn get_by_id<'a>(
        &'a self,
        id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Subscription>>> + Send + 'a>>
    {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM subscriptions WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            row.as_ref()
                .map(row_to_subscription)
                .transpose()
                .map_err(|e| Error::Storage(e.to_string()))
        })
    }

    fn list_feed_urls<'a>(
        &'a self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<String>>> + Send + 'a>>
    {
        Box::pin(async move {
            let rows = sqlx::query("SELECT feed_url FROM subscriptions")
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            Ok(rows
                .into_iter()
                .map(|r| r.get::<String, _>("feed_url"))
                .collect())
        })
    }

    fn get_feed_id<'a>(
        &'a self,
        stream_id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Uuid>>> + Send + 'a>>
    {
        Box::pin(async move {
            let row = sqlx::query("SELECT id FROM subscriptions WHERE stream_id = ?")
                .bind(stream_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            row.map(|r| {
                Uuid::parse_str(&r.get::<String, _>("id"))
                    .map_err(|e| Error::Storage(e.to_string()))
            })
            .transpose()
        })
    }
}

/// SQLite-backed [`ArticleRepository`]. Implements only the operations the
/// fetch orchestrator and incremental-read path need; the full read surface
/// (tags, untagged listing) is served by [`crate::mem`] in this workspace's
/// test/demo configuration.
pub struct SqliteArticleRepository {
    pool: SqlitePool,
}

impl SqliteArticleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_article(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<Article> {
    let published_at: Option<String> = row.try_get("published_at")?;
    let deleted_at: Option<String> = row.try_get("deleted_at")?;
    Ok(Article {
        id: Uuid::parse_str(row.try_get::<String, _>("id")?.as_str())
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        third_party_item_id: row.try_get("third_party_item_id")?,
        subscription_id: Some(
            Uuid::parse_str(row.try_get::<String, _>("subscription_id")?.as_str())
                .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        ),
        origin_stream_id: None,
        url: row.try_get("url")?,
        title: row.try_get("title")?,
        author: row.try_get("author")?,
        content: row.try_get("content")?,
        published_at: published_at
            .map(|s| s.parse::<DateTime<Utc>>())
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        fetched_at: row
            .try_get::<String, _>("fetched_at")?
            .parse::<DateTime<Utc>>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        processed: row.try_get::<i64, _>("processed")? != 0,
        deleted_at: deleted_at
            .map(|s| s.parse::<DateTime<Utc>>())
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
    })
}

impl ArticleRepository for SqliteArticleRepository {
    fn exists<'a>(
        &'a self,
        third_party_item_id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT 1 FROM articles WHERE third_party_item_id = ?")
                .bind(third_party_item_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            Ok(row.is_some())
        })
    }

    fn get_by_id<'a>(
        &'a self,
        id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Article>>> + Send + 'a>>
    {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM articles WHERE id = ?")
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            row.as_ref()
                .map(row_to_article)
                .transpose()
                .map_err(|e| Error::Storage(e.to_string()))
        })
    }

    fn batch_insert<'a>(
        &'a self,
        articles: Vec<Article>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            let mut created = 0usize;
            for article in articles {
                if !article.is_resolved() {
                    return Err(Error::Validation(format!(
                        "article {} inserted without a resolved subscription_id",
                        article.third_party_item_id
                    )));
                }
                // One transaction per article: a single bad row never
                // cascades into the rest of the page.
                let mut tx = self
                    .pool
                    .begin()
                    .await
                    .map_err(|e| Error::Storage(e.to_string()))?;
                let result = sqlx::query(
                    "INSERT OR IGNORE INTO articles
                     (id, third_party_item_id, subscription_id, url, title, author, content, published_at, fetched_at, processed, deleted_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)",
                )
                .bind(article.id.to_string())
                .bind(&article.third_party_item_id)
                .bind(article.subscription_id.unwrap().to_string())
                .bind(&article.url)
                .bind(&article.title)
                .bind(&article.author)
                .bind(&article.content)
                .bind(article.published_at.map(|d| d.to_rfc3339()))
                .bind(article.fetched_at.to_rfc3339())
                .bind(article.processed as i64)
                .execute(&mut *tx)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
                tx.commit().await.map_err(|e| Error::Storage(e.to_string()))?;
                if result.rows_affected() > 0 {
                    created += 1;
                }
            }
            Ok(created)
        })
    }

    fn create<'a>(
        &'a self,
        article: Article,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Article>> + Send + 'a>> {
        Box::pin(async move {
            let inserted = self.batch_insert(vec![article.clone()]).await?;
            if inserted == 0 {
                return Err(Error::UniquenessViolation(format!(
                    "third_party_item_id {} already exists",
                    article.third_party_item_id
                )));
            }
            Ok(article)
        })
    }

    fn get_content<'a>(
        &'a self,
        id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<String>>> + Send + 'a>>
    {
        Box::pin(async move { Ok(self.get_by_id(id).await?.and_then(|a| a.content)) })
    }

    fn list_with_tags<'a>(
        &'a self,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Page<(Article, Vec<crate::model::Tag>)>>> + Send + 'a>,
    > {
        Box::pin(async move {
            let page = self.list_incremental(DateTime::<Utc>::MIN_UTC, cursor, page_size).await?;
            Ok(Page {
                items: page.items.into_iter().map(|a| (a, Vec::new())).collect(),
                next_cursor: page.next_cursor,
            })
        })
    }

    fn list_deleted<'a>(
        &'a self,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Page<Article>>> + Send + 'a>>
    {
        Box::pin(async move {
            let (after_ts, after_id) = cursor
                .map(|c| (c.last_created_at.to_rfc3339(), c.last_id.to_string()))
                .unwrap_or_default();
            let rows = sqlx::query(
                "SELECT * FROM articles WHERE deleted_at IS NOT NULL
                 AND (fetched_at, id) > (?, ?) ORDER BY fetched_at, id LIMIT ?",
            )
            .bind(after_ts)
            .bind(after_id)
            .bind(page_size as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
            rows_to_page(&rows, page_size)
        })
    }

    fn list_incremental<'a>(
        &'a self,
        incremental_mark: DateTime<Utc>,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Page<Article>>> + Send + 'a>>
    {
        Box::pin(async move {
            let (after_ts, after_id) = cursor
                .map(|c| (c.last_created_at.to_rfc3339(), c.last_id.to_string()))
                .unwrap_or_default();
            let rows = sqlx::query(
                "SELECT * FROM articles WHERE fetched_at >= ?
                 AND (fetched_at, id) > (?, ?) ORDER BY fetched_at, id LIMIT ?",
            )
            .bind(incremental_mark.to_rfc3339())
            .bind(after_ts)
            .bind(after_id)
            .bind(page_size as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
            rows_to_page(&rows, page_size)
        })
    }

    fn get_latest_timestamp<'a>(
        &'a self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<DateTime<Utc>>>> + Send + 'a>>
    {
        Box::pin(async move {
            let row = sqlx::query("SELECT MAX(fetched_at) AS max_fetched FROM articles")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            let raw: Option<String> = row.try_get("max_fetched").map_err(|e| Error::Storage(e.to_string()))?;
            raw.map(|s| s.parse::<DateTime<Utc>>())
                .transpose()
                .map_err(|e| Error::Storage(e.to_string()))
        })
    }

    fn list_untagged<'a>(
        &'a self,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Page<Article>>> + Send + 'a>>
    {
        self.list_incremental(DateTime::<Utc>::MIN_UTC, cursor, page_size)
    }
}

fn rows_to_page(rows: &[sqlx::sqlite::SqliteRow], page_size: u32) -> Result<Page<Article>> {
    let items = rows
        .iter()
        .map(row_to_article)
        .collect::<sqlx::Result<Vec<_>>>()
        .map_err(|e| Error::Storage(e.to_string()))?;
    let next_cursor = if items.len() as u32 == page_size {
        items.last().map(|a| KeysetCursor {
            last_created_at: a.fetched_at,
            last_id: a.id,
        })
    } else {
        None
    };
    Ok(Page { items, next_cursor })
}

/// SQLite-backed [`SyncStateRepository`].
pub struct SqliteSyncStateRepository {
    pool: SqlitePool,
}

impl SqliteSyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl SyncStateRepository for SqliteSyncStateRepository {
    fn get<'a>(
        &'a self,
        stream_id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<SyncState>>> + Send + 'a>>
    {
        Box::pin(async move {
            let row = sqlx::query("SELECT * FROM sync_state WHERE stream_id = ?")
                .bind(stream_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            row.map(|r| {
                Ok(SyncState {
                    stream_id: r.get("stream_id"),
                    continuation_token: r.get("continuation_token"),
                    last_sync: r
                        .get::<String, _>("last_sync")
                        .parse::<DateTime<Utc>>()
                        .map_err(|e| Error::Storage(e.to_string()))?,
                })
            })
            .transpose()
        })
    }

    fn upsert<'a>(
        &'a self,
        state: SyncState,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO sync_state (stream_id, continuation_token, last_sync) VALUES (?, ?, ?)
                 ON CONFLICT(stream_id) DO UPDATE SET continuation_token = excluded.continuation_token, last_sync = excluded.last_sync",
            )
            .bind(&state.stream_id)
            .bind(&state.continuation_token)
            .bind(state.last_sync.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
            Ok(())
        })
    }
}

/// SQLite-backed [`ApiUsageRepository`].
pub struct SqliteApiUsageRepository {
    pool: SqlitePool,
}

impl SqliteApiUsageRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_usage(row: &sqlx::sqlite::SqliteRow) -> sqlx::Result<ApiUsageTracking> {
    let date_str: String = row.try_get("date")?;
    let snapshot_json: Option<String> = row.try_get("last_header_snapshot")?;
    Ok(ApiUsageTracking {
        date: date_str
            .parse::<NaiveDate>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        zone1_count: row.try_get::<i64, _>("zone1_count")? as u32,
        zone2_count: row.try_get::<i64, _>("zone2_count")? as u32,
        last_header_snapshot: snapshot_json
            .map(|s| serde_json::from_str::<HeaderSnapshot>(&s))
            .transpose()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
    })
}

impl ApiUsageRepository for SqliteApiUsageRepository {
    fn get_or_create_today<'a>(
        &'a self,
        date: NaiveDate,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ApiUsageTracking>> + Send + 'a>>
    {
        Box::pin(async move {
            sqlx::query(
                "INSERT OR IGNORE INTO api_usage (date, zone1_count, zone2_count) VALUES (?, 0, 0)",
            )
            .bind(date.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
            let row = sqlx::query("SELECT * FROM api_usage WHERE date = ?")
                .bind(date.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            row_to_usage(&row).map_err(|e| Error::Storage(e.to_string()))
        })
    }

    fn record_request<'a>(
        &'a self,
        date: NaiveDate,
        zone: Zone,
        header_snapshot: Option<HeaderSnapshot>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ApiUsageTracking>> + Send + 'a>>
    {
        Box::pin(async move {
            self.get_or_create_today(date).await?;
            let column = match zone {
                Zone::Zone1 => "zone1_count",
                Zone::Zone2 => "zone2_count",
            };
            let snapshot_json = header_snapshot
                .map(|s| serde_json::to_string(&s))
                .transpose()
                .map_err(|e| Error::Storage(e.to_string()))?;
            let query = format!(
                "UPDATE api_usage SET {column} = {column} + 1, last_header_snapshot = COALESCE(?, last_header_snapshot) WHERE date = ?"
            );
            sqlx::query(&query)
                .bind(snapshot_json)
                .bind(date.to_string())
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            let row = sqlx::query("SELECT * FROM api_usage WHERE date = ?")
                .bind(date.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;
            row_to_usage(&row).map_err(|e| Error::Storage(e.to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_pool() -> SqlitePool {
        connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn subscription_roundtrips() {
        let pool = temp_pool().await;
        let repo = SqliteSubscriptionRepository::new(pool);
        let sub = Subscription {
            id: Uuid::new_v4(),
            stream_id: "feed/1".into(),
            feed_url: "http://example.com/rss".into(),
            title: "Example".into(),
            category: String::new(),
            synced_at: Utc::now(),
        };
        repo.create(sub.clone()).await.unwrap();
        let found = repo.find_by_stream_id("feed/1").await.unwrap().unwrap();
        assert_eq!(found.id, sub.id);
    }

    #[tokio::test]
    async fn article_batch_insert_idempotent() {
        let pool = temp_pool().await;
        let sub_repo = SqliteSubscriptionRepository::new(pool.clone());
        let article_repo = SqliteArticleRepository::new(pool);
        let sub = sub_repo
            .create(Subscription {
                id: Uuid::new_v4(),
                stream_id: "feed/1".into(),
                feed_url: "http://example.com/rss".into(),
                title: "Example".into(),
                category: String::new(),
                synced_at: Utc::now(),
            })
            .await
            .unwrap();
        let article = Article {
            id: Uuid::new_v4(),
            third_party_item_id: "item-1".into(),
            subscription_id: Some(sub.id),
            origin_stream_id: None,
            url: "http://example.com/a".into(),
            title: "a".into(),
            author: "author".into(),
            content: None,
            published_at: None,
            fetched_at: Utc::now(),
            processed: false,
            deleted_at: None,
        };
        let first = article_repo.batch_insert(vec![article.clone()]).await.unwrap();
        assert_eq!(first, 1);
        let second = article_repo.batch_insert(vec![article]).await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn api_usage_increments_across_calls() {
        let pool = temp_pool().await;
        let repo = SqliteApiUsageRepository::new(pool);
        let date = Utc::now().date_naive();
        repo.record_request(date, Zone::Zone1, None).await.unwrap();
        let tracking = repo.record_request(date, Zone::Zone1, None).await.unwrap();
        assert_eq!(tracking.zone1_count, 2);
    }
}
