//! Fetch orchestration: identity resolution, idempotent persistence, and
//! the rotation-mode tick loop that drives it.

pub mod error;
pub mod events;
pub mod model;
pub mod orchestrator;
pub mod ticker;

pub use error::{Error, Result};
pub use events::{ArticleCreated, EventPublisher, NullEventPublisher};
pub use model::FetchResult;
pub use orchestrator::FetchOrchestrator;
pub use ticker::spawn_rotation_ticker;
