//! Timezone-aware round-robin subscription rotation.

pub mod error;
pub mod scheduler;

pub use error::{Error, Result};
pub use scheduler::{
    DEFAULT_TIMEZONE, RotationConfig, RotationScheduler, RotationStats, timezone_from_env,
    validate_capacity,
};
