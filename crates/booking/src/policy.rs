//! Cancellation window policy.

use chrono::{DateTime, Duration, Utc};

/// Default lead time below which a booked event can no longer be released.
pub const DEFAULT_CANCELLATION_WINDOW_HOURS: i64 = 24;

/// Hours from `now` until `event_start` (negative once the event has started).
pub fn remaining_cancellation_hours(event_start: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (event_start - now).num_milliseconds() as f64 / 3_600_000.0
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CancellationPolicy {
    window: Duration,
}

impl CancellationPolicy {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn from_hours(hours: i64) -> Self {
        Self::new(Duration::hours(hours))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_hours(&self) -> f64 {
        self.window.num_milliseconds() as f64 / 3_600_000.0
    }

    /// Removal is allowed iff the event is at least `window` away.
    pub fn allows_removal(&self, event_start: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        remaining_cancellation_hours(event_start, now) >= self.window_hours()
    }
}

impl Default for CancellationPolicy {
    fn default() -> Self {
        Self::from_hours(DEFAULT_CANCELLATION_WINDOW_HOURS)
    }
}
