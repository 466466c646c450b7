//! Time sources used by the tracer.
//!
//! Microsecond wall time and nanosecond monotonic time come from different
//! sources, so both are exposed behind one capability. Implementations that
//! cannot guarantee microsecond accuracy on the wall clock report it via
//! [`Clock::is_micros_accurate`], and span durations are then computed from
//! the monotonic tick source instead of wall-clock subtraction.

use once_cell::sync::Lazy;
use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

// Process-wide origin for monotonic ticks. Only tick differences are
// meaningful.
static TICK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Wall-clock time in microseconds since the Unix epoch.
    fn current_time_micros(&self) -> i64;

    /// Monotonic tick counter in nanoseconds. Ticks are not related to wall
    /// time; only differences between two readings are meaningful.
    fn current_nano_ticks(&self) -> i64;

    /// Whether [`Clock::current_time_micros`] carries genuine microsecond
    /// accuracy. When `false`, span durations are derived from
    /// [`Clock::current_nano_ticks`].
    fn is_micros_accurate(&self) -> bool;
}

/// Default clock backed by [`SystemTime`] and [`Instant`].
#[derive(Clone, Debug, Default)]
pub struct SystemClock {
    _private: (),
}

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        SystemClock::default()
    }
}

impl Clock for SystemClock {
    fn current_time_micros(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_micros() as i64)
            .unwrap_or(0)
    }

    fn current_nano_ticks(&self) -> i64 {
        TICK_ORIGIN.elapsed().as_nanos() as i64
    }

    fn is_micros_accurate(&self) -> bool {
        // The wall clock can be adjusted while a span is open; durations are
        // computed from the monotonic source instead.
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nano_ticks_are_monotonic() {
        let clock = SystemClock::new();
        let first = clock.current_nano_ticks();
        let second = clock.current_nano_ticks();
        assert!(second >= first);
    }

    #[test]
    fn wall_clock_is_after_2020() {
        let clock = SystemClock::new();
        // 2020-01-01T00:00:00Z in microseconds
        assert!(clock.current_time_micros() > 1_577_836_800_000_000);
    }
}
