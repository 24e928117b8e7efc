//! Error types for the fetch orchestrator.

/// Errors that abort a `fetch_articles` call outright. Per-article
/// resolution failures and sync-state update failures are *not* modeled
/// here — they are soft errors aggregated on [`crate::model::FetchResult`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("token error: {0}")]
    Token(#[from] oauth_token::Error),

    #[error("api client error: {0}")]
    ApiClient(#[from] reader_client::Error),

    #[error("repository error: {0}")]
    Repository(#[from] ingest_repo::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
