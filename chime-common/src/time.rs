//! Timestamp utilities

use chrono::Utc;
use std::time::{Duration, Instant};

/// Current wall-clock time as epoch milliseconds.
///
/// Used for comparing against server message timestamps and persisted
/// snapshot ages. Monotonic interval measurements use [`LocalClock`].
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Monotonic clock reader.
///
/// Wraps an `Instant` origin so elapsed readings never go backwards even if
/// the wall clock is adjusted. The origin is injectable, which lets tests
/// express "2900 ms after start" without sleeping.
#[derive(Debug, Clone, Copy)]
pub struct LocalClock {
    origin: Instant,
}

impl LocalClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn with_origin(origin: Instant) -> Self {
        Self { origin }
    }

    /// Monotonic instant for interval bookkeeping
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Time elapsed since this clock was created
    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl Default for LocalClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_millis_is_a_plausible_epoch_value() {
        let ts = now_millis();
        // After 2020-01-01, before 2100-01-01
        assert!(ts > 1_577_836_800_000);
        assert!(ts < 4_102_444_800_000);
    }

    #[test]
    fn test_clock_elapsed_is_monotonic() {
        let clock = LocalClock::new();
        let a = clock.elapsed();
        let b = clock.elapsed();
        assert!(b >= a);
    }

    #[test]
    fn test_injected_origin_backdates_elapsed() {
        let origin = Instant::now() - Duration::from_millis(500);
        let clock = LocalClock::with_origin(origin);
        assert!(clock.elapsed() >= Duration::from_millis(500));
    }
}
