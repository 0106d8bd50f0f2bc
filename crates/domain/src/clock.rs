//! Monotonic time source used to measure call latency.

use std::fmt::Debug;
use std::time::Instant;

/// Source of monotonic timestamps.
///
/// Production code uses [`MonotonicClock`]; tests inject a manual clock so
/// latency assertions are deterministic.
pub trait Clock: Send + Sync + Debug {
    /// Current monotonic instant
    fn now(&self) -> Instant;
}

/// Clock backed by the operating system's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
