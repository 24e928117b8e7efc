//! Timezone-aware round-robin rotation scheduler.
//!
//! All mutable state lives behind one `RwLock`: reads use a read guard,
//! every state transition takes the write guard for its whole duration.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use rand::Rng;
use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Default timezone when `TZ` is unset.
pub const DEFAULT_TIMEZONE: Tz = Tz::Asia__Tokyo;

/// Reads the `TZ` environment variable, falling back to `Asia/Tokyo`.
pub fn timezone_from_env() -> Result<Tz> {
    match std::env::var("TZ") {
        Ok(tz) if !tz.is_empty() => tz
            .parse::<Tz>()
            .map_err(|_| Error::InvalidTimezone(tz.clone())),
        _ => Ok(DEFAULT_TIMEZONE),
    }
}

/// Static configuration for a [`RotationScheduler`].
#[derive(Debug, Clone)]
pub struct RotationConfig {
    pub max_daily_rotations: u32,
    pub interval_minutes: i64,
    pub random_start_enabled: bool,
    pub timezone: Tz,
    /// Number of subscriptions drawn per scheduler tick; used only for
    /// capacity validation, not by the selection algorithm itself.
    pub batch_size: usize,
}

/// Rejects configurations where the scheduler cannot possibly process every
/// subscription `max_daily_rotations` times before the day rolls over.
pub fn validate_capacity(
    sub_count: usize,
    max_daily_rotations: u32,
    interval_minutes: i64,
    batch_size: usize,
) -> Result<()> {
    let ticks_per_day = (1440 / interval_minutes.max(1)) as u32;
    let available = ticks_per_day as u64 * batch_size as u64;
    let needed = sub_count as u64 * max_daily_rotations as u64;
    if available < needed {
        return Err(Error::InsufficientCapacity {
            ticks_per_day,
            batch_size,
            available,
            needed,
            sub_count,
            max_daily_rotations,
        });
    }
    Ok(())
}

#[derive(Debug)]
struct RotationState {
    subscriptions: Vec<Uuid>,
    current_index: usize,
    last_processed: HashMap<Uuid, DateTime<Utc>>,
    last_reset_date: NaiveDate,
    interval_minutes: i64,
}

/// Snapshot of today's rotation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationStats {
    pub processed_today: usize,
    pub remaining_today: usize,
}

/// Selects the next subscription to poll such that, over a local-timezone
/// day, each subscription is processed exactly `max_daily_rotations` times.
pub struct RotationScheduler {
    state: RwLock<RotationState>,
    max_daily_rotations: u32,
    random_start_enabled: bool,
    timezone: Tz,
}

impl RotationScheduler {
    pub fn new(subscriptions: Vec<Uuid>, config: RotationConfig) -> Result<Self> {
        validate_capacity(
            subscriptions.len(),
            config.max_daily_rotations,
            config.interval_minutes,
            config.batch_size,
        )?;

        let mut shuffled = subscriptions;
        shuffled.shuffle(&mut rand::rng());
        let today = Utc::now().with_timezone(&config.timezone).date_naive();

        Ok(Self {
            state: RwLock::new(RotationState {
                subscriptions: shuffled,
                current_index: 0,
                last_processed: HashMap::new(),
                last_reset_date: today,
                interval_minutes: config.interval_minutes,
            }),
            max_daily_rotations: config.max_daily_rotations,
            random_start_enabled: config.random_start_enabled,
            timezone: config.timezone,
        })
    }

    /// Select the next subscription, or `None` if today's quota is
    /// exhausted. Uses the system clock; see [`Self::get_next_at`] for the
    /// clock-injected variant used by tests.
    pub async fn get_next(&self) -> Option<Uuid> {
        self.get_next_at(Utc::now()).await
    }

    pub async fn get_next_at(&self, now: DateTime<Utc>) -> Option<Uuid> {
        let mut state = self.state.write().await;
        let today = now.with_timezone(&self.timezone).date_naive();
        if today != state.last_reset_date {
            self.daily_reset(&mut state, today);
        }

        let n = state.subscriptions.len();
        if n == 0 {
            return None;
        }

        let total_capacity = n * self.max_daily_rotations as usize;
        if state.current_index >= total_capacity {
            return None;
        }

        let actual = state.current_index % n;
        let id = state.subscriptions[actual];
        state.last_processed.insert(id, now);
        state.current_index += 1;
        Some(id)
    }

    fn daily_reset(&self, state: &mut RotationState, today: NaiveDate) {
        info!(date = %today, "rotation daily reset");
        state.subscriptions.shuffle(&mut rand::rng());
        state.last_processed.clear();
        state.current_index = if self.random_start_enabled && !state.subscriptions.is_empty() {
            rand::rng().random_range(0..state.subscriptions.len())
        } else {
            0
        };
        state.last_reset_date = today;
    }

    /// True if no subscription has been processed yet, or if `interval_minutes`
    /// has elapsed since the most recent selection.
    pub async fn is_ready_for_next(&self) -> bool {
        self.is_ready_for_next_at(Utc::now()).await
    }

    pub async fn is_ready_for_next_at(&self, now: DateTime<Utc>) -> bool {
        let state = self.state.read().await;
        match state.last_processed.values().max() {
            None => true,
            Some(last) => now > *last + chrono::Duration::minutes(state.interval_minutes),
        }
    }

    /// Repeatedly calls [`Self::get_next`] up to `n` times, stopping early
    /// once today's quota is exhausted.
    pub async fn get_next_batch(&self, n: usize) -> Vec<Uuid> {
        let mut batch = Vec::with_capacity(n);
        for _ in 0..n {
            match self.get_next().await {
                Some(id) => batch.push(id),
                None => break,
            }
        }
        batch
    }

    pub async fn get_stats(&self) -> RotationStats {
        let state = self.state.read().await;
        let total_capacity = state.subscriptions.len() * self.max_daily_rotations as usize;
        let processed_today = state.current_index.min(total_capacity);
        RotationStats {
            processed_today,
            remaining_today: total_capacity - processed_today,
        }
    }

    pub async fn get_interval(&self) -> i64 {
        self.state.read().await.interval_minutes
    }

    pub async fn set_interval(&self, interval_minutes: i64) {
        self.state.write().await.interval_minutes = interval_minutes;
    }

    /// Replaces the managed subscription set, reshuffling it and resetting
    /// today's progress. `last_reset_date` is left untouched — this is a
    /// membership change, not a new day.
    pub async fn load_subscriptions(&self, subscriptions: Vec<Uuid>) {
        let mut shuffled = subscriptions;
        shuffled.shuffle(&mut rand::rng());
        let mut state = self.state.write().await;
        state.subscriptions = shuffled;
        state.current_index = 0;
        state.last_processed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(max_daily_rotations: u32, interval_minutes: i64) -> RotationConfig {
        RotationConfig {
            max_daily_rotations,
            interval_minutes,
            random_start_enabled: false,
            timezone: DEFAULT_TIMEZONE,
            batch_size: 1,
        }
    }

    fn three_subs() -> Vec<Uuid> {
        vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()]
    }

    #[test]
    fn validate_capacity_rejects_insufficient_budget() {
        // 3 subs * 2 rotations = 6 needed; 1 tick/day (1440 min interval) * 1 batch = 1 available.
        let err = validate_capacity(3, 2, 1440, 1);
        assert!(err.is_err());
    }

    #[test]
    fn validate_capacity_accepts_sufficient_budget() {
        // 3 subs * 2 rotations = 6 needed; 1440/10 = 144 ticks * 1 batch = 144 available.
        assert!(validate_capacity(3, 2, 10, 1).is_ok());
    }

    #[tokio::test]
    async fn round_robin_cycles_in_shuffled_order() {
        let subs = three_subs();
        let scheduler = RotationScheduler::new(subs.clone(), config(2, 10)).unwrap();
        let now = Utc::now();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(scheduler.get_next_at(now).await.unwrap());
        }
        // All three subscriptions appear exactly once in the first lap,
        // regardless of shuffle order.
        for s in &subs {
            assert!(seen.contains(s));
        }
    }

    #[tokio::test]
    async fn each_subscription_selected_at_most_max_daily_rotations_times() {
        let subs = three_subs();
        let scheduler = RotationScheduler::new(subs.clone(), config(2, 10)).unwrap();
        let now = Utc::now();
        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        for _ in 0..12 {
            if let Some(id) = scheduler.get_next_at(now).await {
                *counts.entry(id).or_default() += 1;
            }
        }
        for count in counts.values() {
            assert!(*count <= 2);
        }
        let total: usize = counts.values().sum();
        assert_eq!(total, 6, "3 subs * 2 rotations = 6 total selections per day");
    }

    #[tokio::test]
    async fn done_for_today_returns_none_past_capacity() {
        let subs = three_subs();
        let scheduler = RotationScheduler::new(subs, config(1, 10)).unwrap();
        let now = Utc::now();
        assert!(scheduler.get_next_at(now).await.is_some());
        assert!(scheduler.get_next_at(now).await.is_some());
        assert!(scheduler.get_next_at(now).await.is_some());
        assert!(scheduler.get_next_at(now).await.is_none(), "quota exhausted for the day");
    }

    #[tokio::test]
    async fn daily_reset_rolls_over_in_jst() {
        // Scenario: TZ=Asia/Tokyo, max_daily_rotations=2, 3 subscriptions.
        // Day 1: process all 6 selections. Advance to 2025-09-04 01:30 UTC
        // (10:30 JST, a new calendar day in Tokyo). The next get_next must
        // select a subscription and leave current_index == 1.
        let subs = three_subs();
        let scheduler = RotationScheduler::new(subs, config(2, 10)).unwrap();

        let day1 = Tz::Asia__Tokyo
            .with_ymd_and_hms(2025, 9, 3, 10, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        for _ in 0..6 {
            assert!(scheduler.get_next_at(day1).await.is_some());
        }
        assert!(scheduler.get_next_at(day1).await.is_none(), "day 1 quota exhausted");

        let day2 = Utc.with_ymd_and_hms(2025, 9, 4, 1, 30, 0).unwrap();
        let selection = scheduler.get_next_at(day2).await;
        assert!(selection.is_some(), "new day must yield a fresh selection");

        let stats = scheduler.get_stats().await;
        assert_eq!(stats.processed_today, 1);
        assert_eq!(stats.remaining_today, 5);
    }

    #[tokio::test]
    async fn is_ready_for_next_true_when_no_history() {
        let scheduler = RotationScheduler::new(three_subs(), config(2, 10)).unwrap();
        assert!(scheduler.is_ready_for_next().await);
    }

    #[tokio::test]
    async fn is_ready_for_next_false_until_interval_elapses() {
        let scheduler = RotationScheduler::new(three_subs(), config(2, 10)).unwrap();
        let now = Utc::now();
        scheduler.get_next_at(now).await;
        assert!(!scheduler.is_ready_for_next_at(now + chrono::Duration::minutes(5)).await);
        assert!(scheduler.is_ready_for_next_at(now + chrono::Duration::minutes(11)).await);
    }

    #[tokio::test]
    async fn get_next_batch_stops_at_daily_capacity() {
        let scheduler = RotationScheduler::new(three_subs(), config(1, 10)).unwrap();
        let batch = scheduler.get_next_batch(10).await;
        assert_eq!(batch.len(), 3, "only 3 selections available before exhaustion");
    }

    #[tokio::test]
    async fn set_interval_and_get_interval_roundtrip() {
        let scheduler = RotationScheduler::new(three_subs(), config(2, 10)).unwrap();
        assert_eq!(scheduler.get_interval().await, 10);
        scheduler.set_interval(20).await;
        assert_eq!(scheduler.get_interval().await, 20);
    }

    #[tokio::test]
    async fn load_subscriptions_resets_progress_but_not_reset_date() {
        let scheduler = RotationScheduler::new(three_subs(), config(2, 10)).unwrap();
        let now = Utc::now();
        scheduler.get_next_at(now).await;
        let new_subs = vec![Uuid::new_v4(), Uuid::new_v4()];
        scheduler.load_subscriptions(new_subs).await;
        let stats = scheduler.get_stats().await;
        assert_eq!(stats.processed_today, 0);
    }
}
