//! Error types for the rotation scheduler.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error(
        "insufficient daily capacity: {ticks_per_day} ticks/day * {batch_size} batch size = {available} \
         available selections, need {needed} ({sub_count} subscriptions * {max_daily_rotations} rotations)"
    )]
    InsufficientCapacity {
        ticks_per_day: u32,
        batch_size: usize,
        available: u64,
        needed: u64,
        sub_count: usize,
        max_daily_rotations: u32,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
