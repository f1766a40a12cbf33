//! Tick-driven time budget helpers.

use std::time::{Duration, Instant};

/// Time elapsed between `started_at` and the tick instant `now`.
///
/// Saturates to zero if `now` precedes `started_at`.
pub fn elapsed_since(started_at: Instant, now: Instant) -> Duration {
    now.checked_duration_since(started_at)
        .unwrap_or(Duration::from_secs(0))
}

/// True once strictly more than `timeout` has elapsed since `started_at`.
pub fn budget_exceeded(started_at: Instant, now: Instant, timeout: Duration) -> bool {
    elapsed_since(started_at, now) > timeout
}
