//! In-memory repository implementations.
//!
//! Backs unit tests and the fetch orchestrator's own test suite. Not
//! intended for production use — state is lost on process restart.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{
    Article, ApiUsageTracking, ArticleSummary, HeaderSnapshot, KeysetCursor, Subscription,
    SummaryQuality, SyncState, Tag, Zone,
};
use crate::repo::{
    ApiUsageRepository, ArticleRepository, Page, SubscriptionRepository,
    SummaryQualityRepository, SyncStateRepository, TagRepository,
};

/// Orders `(fetched_at, id)` ascending, the keyset this module paginates on.
fn sort_key(article: &Article) -> (chrono::DateTime<Utc>, Uuid) {
    (article.fetched_at, article.id)
}

fn paginate<T: Clone>(
    mut items: Vec<(chrono::DateTime<Utc>, Uuid, T)>,
    cursor: Option<KeysetCursor>,
    page_size: u32,
) -> Page<T> {
    items.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    let start = match cursor {
        Some(c) => items
            .iter()
            .position(|(ts, id, _)| (*ts, *id) > (c.last_created_at, c.last_id))
            .unwrap_or(items.len()),
        None => 0,
    };
    let page: Vec<_> = items
        .into_iter()
        .skip(start)
        .take(page_size as usize)
        .collect();
    let next_cursor = page.last().map(|(ts, id, _)| KeysetCursor {
        last_created_at: *ts,
        last_id: *id,
    });
    let has_more_hint = page.len() as u32 == page_size;
    Page {
        items: page.into_iter().map(|(_, _, v)| v).collect(),
        next_cursor: if has_more_hint { next_cursor } else { None },
    }
}

/// Thread-safe in-memory [`SubscriptionRepository`].
#[derive(Default)]
pub struct InMemorySubscriptionRepository {
    by_id: Mutex<HashMap<Uuid, Subscription>>,
}

impl InMemorySubscriptionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SubscriptionRepository for InMemorySubscriptionRepository {
    fn find_by_stream_id<'a>(
        &'a self,
        stream_id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Subscription>>> + Send + 'a>>
    {
        Box::pin(async move {
            let guard = self.by_id.lock().unwrap();
            Ok(guard.values().find(|s| s.stream_id == stream_id).cloned())
        })
    }

    fn create<'a>(
        &'a self,
        subscription: Subscription,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Subscription>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut guard = self.by_id.lock().unwrap();
            if guard
                .values()
                .any(|s| s.stream_id == subscription.stream_id)
            {
                return Err(Error::UniquenessViolation(format!(
                    "stream_id {} already exists",
                    subscription.stream_id
                )));
            }
            guard.insert(subscription.id, subscription.clone());
            Ok(subscription)
        })
    }

    fn get_by_id<'a>(
        &'a self,
        id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Subscription>>> + Send + 'a>>
    {
        Box::pin(async move { Ok(self.by_id.lock().unwrap().get(&id).cloned()) })
    }

    fn list_feed_urls<'a>(
        &'a self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<String>>> + Send + 'a>>
    {
        Box::pin(async move {
            Ok(self
                .by_id
                .lock()
                .unwrap()
                .values()
                .map(|s| s.feed_url.clone())
                .collect())
        })
    }

    fn get_feed_id<'a>(
        &'a self,
        stream_id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Uuid>>> + Send + 'a>>
    {
        Box::pin(async move {
            Ok(self
                .by_id
                .lock()
                .unwrap()
                .values()
                .find(|s| s.stream_id == stream_id)
                .map(|s| s.id))
        })
    }
}

/// Thread-safe in-memory [`ArticleRepository`].
#[derive(Default)]
pub struct InMemoryArticleRepository {
    by_id: Mutex<HashMap<Uuid, Article>>,
}

impl InMemoryArticleRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ArticleRepository for InMemoryArticleRepository {
    fn exists<'a>(
        &'a self,
        third_party_item_id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .by_id
                .lock()
                .unwrap()
                .values()
                .any(|a| a.third_party_item_id == third_party_item_id))
        })
    }

    fn get_by_id<'a>(
        &'a self,
        id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<Article>>> + Send + 'a>>
    {
        Box::pin(async move { Ok(self.by_id.lock().unwrap().get(&id).cloned()) })
    }

    fn batch_insert<'a>(
        &'a self,
        articles: Vec<Article>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            let mut guard = self.by_id.lock().unwrap();
            let mut created = 0usize;
            for article in articles {
                if !article.is_resolved() {
                    return Err(Error::Validation(format!(
                        "article {} inserted without a resolved subscription_id",
                        article.third_party_item_id
                    )));
                }
                // Each article commits independently: a duplicate third-party
                // item ID is skipped rather than aborting the whole batch.
                let duplicate = guard
                    .values()
                    .any(|a| a.third_party_item_id == article.third_party_item_id);
                if duplicate {
                    continue;
                }
                guard.insert(article.id, article);
                created += 1;
            }
            Ok(created)
        })
    }

    fn create<'a>(
        &'a self,
        article: Article,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Article>> + Send + 'a>> {
        Box::pin(async move {
            let mut guard = self.by_id.lock().unwrap();
            if guard
                .values()
                .any(|a| a.third_party_item_id == article.third_party_item_id)
            {
                return Err(Error::UniquenessViolation(format!(
                    "third_party_item_id {} already exists",
                    article.third_party_item_id
                )));
            }
            guard.insert(article.id, article.clone());
            Ok(article)
        })
    }

    fn get_content<'a>(
        &'a self,
        id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<String>>> + Send + 'a>>
    {
        Box::pin(async move { Ok(self.by_id.lock().unwrap().get(&id).and_then(|a| a.content.clone())) })
    }

    fn list_with_tags<'a>(
        &'a self,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Page<(Article, Vec<Tag>)>>> + Send + 'a>,
    > {
        Box::pin(async move {
            let guard = self.by_id.lock().unwrap();
            let items: Vec<_> = guard
                .values()
                .filter(|a| a.deleted_at.is_none())
                .map(|a| (sort_key(a).0, sort_key(a).1, (a.clone(), Vec::new())))
                .collect();
            Ok(paginate(items, cursor, page_size))
        })
    }

    fn list_deleted<'a>(
        &'a self,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Page<Article>>> + Send + 'a>>
    {
        Box::pin(async move {
            let guard = self.by_id.lock().unwrap();
            let items: Vec<_> = guard
                .values()
                .filter(|a| a.deleted_at.is_some())
                .map(|a| (sort_key(a).0, sort_key(a).1, a.clone()))
                .collect();
            Ok(paginate(items, cursor, page_size))
        })
    }

    fn list_incremental<'a>(
        &'a self,
        incremental_mark: chrono::DateTime<Utc>,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Page<Article>>> + Send + 'a>>
    {
        Box::pin(async move {
            let guard = self.by_id.lock().unwrap();
            let items: Vec<_> = guard
                .values()
                .filter(|a| a.fetched_at >= incremental_mark)
                .map(|a| (sort_key(a).0, sort_key(a).1, a.clone()))
                .collect();
            Ok(paginate(items, cursor, page_size))
        })
    }

    fn get_latest_timestamp<'a>(
        &'a self,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<chrono::DateTime<Utc>>>> + Send + 'a>>
    {
        Box::pin(async move {
            Ok(self
                .by_id
                .lock()
                .unwrap()
                .values()
                .map(|a| a.fetched_at)
                .max())
        })
    }

    fn list_untagged<'a>(
        &'a self,
        cursor: Option<KeysetCursor>,
        page_size: u32,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Page<Article>>> + Send + 'a>>
    {
        Box::pin(async move {
            let guard = self.by_id.lock().unwrap();
            let items: Vec<_> = guard
                .values()
                .map(|a| (sort_key(a).0, sort_key(a).1, a.clone()))
                .collect();
            Ok(paginate(items, cursor, page_size))
        })
    }
}

/// Thread-safe in-memory [`SyncStateRepository`].
#[derive(Default)]
pub struct InMemorySyncStateRepository {
    by_stream: Mutex<HashMap<String, SyncState>>,
}

impl InMemorySyncStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SyncStateRepository for InMemorySyncStateRepository {
    fn get<'a>(
        &'a self,
        stream_id: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<SyncState>>> + Send + 'a>>
    {
        Box::pin(async move { Ok(self.by_stream.lock().unwrap().get(stream_id).cloned()) })
    }

    fn upsert<'a>(
        &'a self,
        state: SyncState,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.by_stream
                .lock()
                .unwrap()
                .insert(state.stream_id.clone(), state);
            Ok(())
        })
    }
}

/// Thread-safe in-memory [`ApiUsageRepository`].
#[derive(Default)]
pub struct InMemoryApiUsageRepository {
    by_date: Mutex<HashMap<NaiveDate, ApiUsageTracking>>,
}

impl InMemoryApiUsageRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ApiUsageRepository for InMemoryApiUsageRepository {
    fn get_or_create_today<'a>(
        &'a self,
        date: NaiveDate,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<ApiUsageTracking>> + Send + 'a>>
    {
        Box::pin(async move {
            let mut guard = self.by_date.lock().unwrap();
            let entry = guard.entry(date).or_insert_with(|| ApiUsageTracking {
                date,
                zone1_count: 0,
                zone2_count: 0,
                last_header_snapshot: None,
            });
            Ok(entry.clone())
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
            let mut guard = self.by_date.lock().unwrap();
            let entry = guard.entry(date).or_insert_with(|| ApiUsageTracking {
                date,
                zone1_count: 0,
                zone2_count: 0,
                last_header_snapshot: None,
            });
            match zone {
                Zone::Zone1 => entry.zone1_count += 1,
                Zone::Zone2 => entry.zone2_count += 1,
            }
            if let Some(snapshot) = header_snapshot {
                entry.last_header_snapshot = Some(snapshot);
            }
            Ok(entry.clone())
        })
    }
}

/// Thread-safe in-memory [`TagRepository`].
#[derive(Default)]
pub struct InMemoryTagRepository {
    by_article: Mutex<HashMap<Uuid, Vec<Tag>>>,
}

impl InMemoryTagRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TagRepository for InMemoryTagRepository {
    fn upsert_tags<'a>(
        &'a self,
        article_id: Uuid,
        tags: Vec<String>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let entries = tags
                .into_iter()
                .map(|name| Tag {
                    id: Uuid::new_v4(),
                    name,
                })
                .collect();
            self.by_article.lock().unwrap().insert(article_id, entries);
            Ok(())
        })
    }

    fn batch_upsert_tags<'a>(
        &'a self,
        updates: Vec<(Uuid, Vec<String>)>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<usize>> + Send + 'a>> {
        Box::pin(async move {
            let mut guard = self.by_article.lock().unwrap();
            let count = updates.len();
            for (article_id, tags) in updates {
                let entries = tags
                    .into_iter()
                    .map(|name| Tag {
                        id: Uuid::new_v4(),
                        name,
                    })
                    .collect();
                guard.insert(article_id, entries);
            }
            Ok(count)
        })
    }

    fn list_for_article<'a>(
        &'a self,
        article_id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Vec<Tag>>> + Send + 'a>> {
        Box::pin(async move {
            Ok(self
                .by_article
                .lock()
                .unwrap()
                .get(&article_id)
                .cloned()
                .unwrap_or_default())
        })
    }
}

/// Thread-safe in-memory [`SummaryQualityRepository`].
#[derive(Default)]
pub struct InMemorySummaryQualityRepository {
    summaries: Mutex<HashMap<Uuid, ArticleSummary>>,
    qualities: Mutex<HashMap<Uuid, SummaryQuality>>,
}

impl InMemorySummaryQualityRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SummaryQualityRepository for InMemorySummaryQualityRepository {
    fn save_summary<'a>(
        &'a self,
        summary: ArticleSummary,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.summaries
                .lock()
                .unwrap()
                .insert(summary.article_id, summary);
            Ok(())
        })
    }

    fn get_summary<'a>(
        &'a self,
        article_id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<ArticleSummary>>> + Send + 'a>>
    {
        Box::pin(async move { Ok(self.summaries.lock().unwrap().get(&article_id).cloned()) })
    }

    fn record_quality<'a>(
        &'a self,
        quality: SummaryQuality,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.qualities
                .lock()
                .unwrap()
                .insert(quality.article_id, quality);
            Ok(())
        })
    }

    fn get_quality<'a>(
        &'a self,
        article_id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Option<SummaryQuality>>> + Send + 'a>>
    {
        Box::pin(async move { Ok(self.qualities.lock().unwrap().get(&article_id).cloned()) })
    }
}
