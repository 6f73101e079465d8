//! Injected clock and warning rate limiter
//!
//! The classifier emits at most one no-route warning per interval. Time
//! comes through the [`Clock`] trait so tests drive it manually.

use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock {
    /// Elapsed time since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Wall-clock backed [`Clock`], anchored at construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }
}

/// Allows one event per interval.
#[derive(Debug)]
pub struct RateLimiter<C: Clock> {
    clock: C,
    interval: Duration,
    last: Option<Duration>,
}

impl<C: Clock> RateLimiter<C> {
    pub fn new(clock: C, interval: Duration) -> Self {
        Self {
            clock,
            interval,
            last: None,
        }
    }

    /// Returns true if the event may fire now, consuming the interval.
    pub fn allow(&mut self) -> bool {
        let now = self.clock.now();
        match self.last {
            Some(last) if now < last + self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct ManualClock {
        millis: AtomicU64,
    }

    impl ManualClock {
        fn new() -> Self {
            Self {
                millis: AtomicU64::new(0),
            }
        }

        fn advance(&self, ms: u64) {
            self.millis.fetch_add(ms, Ordering::Relaxed);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            Duration::from_millis(self.millis.load(Ordering::Relaxed))
        }
    }

    #[test]
    fn test_first_event_allowed() {
        let clock = Arc::new(ManualClock::new());
        let mut limiter = RateLimiter::new(Arc::clone(&clock), Duration::from_secs(5));
        assert!(limiter.allow());
    }

    #[test]
    fn test_window_suppresses_then_reopens() {
        let clock = Arc::new(ManualClock::new());
        let mut limiter = RateLimiter::new(Arc::clone(&clock), Duration::from_secs(5));

        assert!(limiter.allow());
        assert!(!limiter.allow());

        clock.advance(4_999);
        assert!(!limiter.allow());

        clock.advance(1);
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_window_anchored_at_last_emission() {
        let clock = Arc::new(ManualClock::new());
        let mut limiter = RateLimiter::new(Arc::clone(&clock), Duration::from_secs(5));

        assert!(limiter.allow());
        clock.advance(7_000);
        assert!(limiter.allow());
        // The next window starts at 7s, not 5s.
        clock.advance(3_000);
        assert!(!limiter.allow());
        clock.advance(2_000);
        assert!(limiter.allow());
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
