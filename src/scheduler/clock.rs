//! Time sources for the scheduler.

use parking_lot::Mutex;
use std::fmt;
use std::time::{Duration, Instant};

/// Monotonic time source the timer thread reads trigger times from.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;

    /// Longest the timer may sleep before looking at the clock again.
    ///
    /// `None` means it sleeps straight until the next trigger, which is
    /// only correct when the clock moves with real time.
    fn max_park(&self) -> Option<Duration> {
        None
    }
}

/// The real monotonic clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Useful for driving a [`Scheduler`](super::Scheduler) deterministically
/// in tests.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn max_park(&self) -> Option<Duration> {
        Some(Duration::from_millis(1))
    }
}
