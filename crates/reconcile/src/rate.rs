//! Minimum-interval pacing for point lookups.
//!
//! Each caller reserves the next free slot under a short lock and then sleeps
//! outside it, so concurrent workers are spaced `min_interval` apart in
//! aggregate rather than each pacing itself.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Clock abstraction so pacing can be tested without real sleeps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`.
#[derive(Clone, Copy, Default)]
pub struct RealClock;

impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct RateLimiter<C: Clock = RealClock> {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
    clock: C,
}

impl RateLimiter<RealClock> {
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, RealClock)
    }
}

impl<C: Clock> RateLimiter<C> {
    pub fn with_clock(min_interval: Duration, clock: C) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
            clock,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Block until the caller's slot comes up. Returns how long it waited.
    pub fn acquire(&self) -> Duration {
        if self.min_interval.is_zero() {
            return Duration::ZERO;
        }

        let now = self.clock.now();
        let slot = {
            let mut next = self.next_slot.lock();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };

        let wait = slot.saturating_duration_since(now);
        if !wait.is_zero() {
            self.clock.sleep(wait);
        }
        wait
    }
}
