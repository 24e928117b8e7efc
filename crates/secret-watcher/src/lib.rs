//! Kubernetes Secret polling: detects a changed credential push and feeds
//! it directly into the token manager, bypassing any refresh call.

pub mod client;
pub mod error;
pub mod model;
pub mod watcher;

pub use client::KubeSecretClient;
pub use error::{Error, Result};
pub use watcher::{DEFAULT_POLL_INTERVAL, SecretWatcher, spawn_watch_task};
