//! Authenticated client for the reader API: quota-aware, retrying, and
//! parsing raw responses into `ingest_repo` domain types.

pub mod client;
pub mod error;
pub mod model;
pub mod quota;

pub use client::{ApiClient, RetryConfig, is_retryable_status};
pub use error::{Error, Result};
