//! Time source used to stamp entry births and judge staleness.
//!
//! The store never calls `Instant::now()` directly; it asks its [`Clock`].
//! [`ManualClock`] lets tests step time forward deterministically.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock time via [`Instant::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same offset, so a test can keep one copy and hand the
/// other to the store.
///
/// ```
/// use std::time::Duration;
/// use streamcache::clock::{Clock, ManualClock};
///
/// let clock = ManualClock::new();
/// let t0 = clock.now();
/// clock.advance(Duration::from_secs(3));
/// assert_eq!(clock.now() - t0, Duration::from_secs(3));
/// ```
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
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
}
