//! Wire DTOs for the reader API, and their conversion into domain types.
//!
//! Reader-API responses are loosely typed JSON; these structs are the one
//! place that dynamic typing is tolerated. Everything past `parse_*` is a
//! strict `ingest_repo` domain struct.

use chrono::{DateTime, Utc};
use ingest_repo::{Article, Subscription};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SubscriptionListResponse {
    #[serde(default)]
    pub subscriptions: Vec<RawSubscription>,
}

#[derive(Debug, Deserialize)]
pub struct RawSubscription {
    pub id: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub categories: Vec<RawCategory>,
}

#[derive(Debug, Deserialize)]
pub struct RawCategory {
    pub label: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StreamContentsResponse {
    #[serde(default)]
    pub items: Vec<RawItem>,
    pub continuation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawItem {
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published: Option<f64>,
    #[serde(default)]
    pub canonical: Vec<RawLink>,
    #[serde(default)]
    pub origin: Option<RawOrigin>,
}

#[derive(Debug, Deserialize)]
pub struct RawLink {
    pub href: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawOrigin {
    #[serde(rename = "streamId")]
    pub stream_id: Option<String>,
}

/// Converts a parsed subscription-list response into domain subscriptions.
/// An entry with an empty or missing `id`/`url` is skipped with a warning
/// rather than failing the whole batch.
pub fn parse_subscriptions(response: SubscriptionListResponse) -> Vec<Subscription> {
    let now = Utc::now();
    response
        .subscriptions
        .into_iter()
        .filter_map(|raw| {
            let stream_id = raw.id.filter(|s| !s.is_empty());
            let feed_url = raw.url.filter(|s| !s.is_empty());
            let (Some(stream_id), Some(feed_url)) = (stream_id, feed_url) else {
                warn!("skipping subscription-list entry with empty id or url");
                return None;
            };
            let category = raw
                .categories
                .into_iter()
                .find_map(|c| c.label.filter(|l| !l.is_empty()))
                .unwrap_or_default();
            Some(Subscription {
                id: Uuid::new_v4(),
                stream_id,
                feed_url,
                title: raw.title.unwrap_or_default(),
                category,
                synced_at: now,
            })
        })
        .collect()
}

/// Converts a parsed stream-contents response into domain articles plus the
/// continuation token for the next page. Articles are returned unresolved
/// (`subscription_id = None`, `origin_stream_id = Some(..)`); resolution
/// happens in the fetch orchestrator.
pub fn parse_stream_contents(response: StreamContentsResponse) -> (Vec<Article>, Option<String>) {
    let now = Utc::now();
    let articles = response
        .items
        .into_iter()
        .filter_map(|raw| {
            let item_id = raw.id.filter(|s| !s.is_empty())?;
            let url = raw
                .canonical
                .into_iter()
                .find_map(|l| l.href.filter(|h| !h.is_empty()))
                .unwrap_or_default();
            let published_at = raw
                .published
                .map(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0).unwrap_or(now));
            Some(Article {
                id: Uuid::new_v4(),
                third_party_item_id: item_id,
                subscription_id: None,
                origin_stream_id: raw.origin.and_then(|o| o.stream_id),
                url,
                title: raw.title.unwrap_or_default(),
                author: raw.author.unwrap_or_default(),
                content: None,
                published_at,
                fetched_at: now,
                processed: false,
                deleted_at: None,
            })
        })
        .collect();
    (articles, response.continuation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_subscriptions_skips_entries_missing_id_or_url() {
        let response = SubscriptionListResponse {
            subscriptions: vec![
                RawSubscription {
                    id: Some("feed/1".into()),
                    url: Some("http://example.com/rss".into()),
                    title: Some("Example".into()),
                    categories: vec![RawCategory { label: Some("News".into()) }],
                },
                RawSubscription {
                    id: None,
                    url: Some("http://example.com/rss2".into()),
                    title: None,
                    categories: vec![],
                },
                RawSubscription {
                    id: Some("feed/3".into()),
                    url: Some(String::new()),
                    title: None,
                    categories: vec![],
                },
            ],
        };
        let parsed = parse_subscriptions(response);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].stream_id, "feed/1");
        assert_eq!(parsed[0].category, "News");
    }

    #[test]
    fn parse_subscriptions_defaults_category_when_no_labels() {
        let response = SubscriptionListResponse {
            subscriptions: vec![RawSubscription {
                id: Some("feed/1".into()),
                url: Some("http://example.com/rss".into()),
                title: None,
                categories: vec![],
            }],
        };
        let parsed = parse_subscriptions(response);
        assert_eq!(parsed[0].category, "");
    }

    #[test]
    fn parse_stream_contents_captures_origin_stream_id_and_continuation() {
        let response = StreamContentsResponse {
            items: vec![RawItem {
                id: Some("item-1".into()),
                title: Some("Title".into()),
                author: Some("Author".into()),
                published: Some(1_700_000_000.0),
                canonical: vec![RawLink { href: Some("http://example.com/a".into()) }],
                origin: Some(RawOrigin { stream_id: Some("feed/http://example.com/rss".into()) }),
            }],
            continuation: Some("cont-1".into()),
        };
        let (articles, continuation) = parse_stream_contents(response);
        assert_eq!(articles.len(), 1);
        assert_eq!(articles[0].origin_stream_id.as_deref(), Some("feed/http://example.com/rss"));
        assert!(articles[0].subscription_id.is_none());
        assert_eq!(continuation.as_deref(), Some("cont-1"));
    }

    #[test]
    fn parse_stream_contents_skips_items_missing_id() {
        let response = StreamContentsResponse {
            items: vec![RawItem {
                id: None,
                title: None,
                author: None,
                published: None,
                canonical: vec![],
                origin: None,
            }],
            continuation: None,
        };
        let (articles, _) = parse_stream_contents(response);
        assert!(articles.is_empty());
    }
}
