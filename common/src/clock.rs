// Clock abstraction so fire-time calculations can be driven deterministically
// in tests instead of reading the system clock directly.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

/// Provides the current wall-clock time.
pub trait Clock: Send + Sync {
    /// Returns the current time as UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Default [`Clock`] backed by the system clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced [`Clock`] for tests.
///
/// Exported from the library (rather than hidden behind `#[cfg(test)]`) so the
/// scheduler binary's tests and the integration tests can share it.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at the given instant.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now = *now + delta;
    }

    /// Jump the clock to an absolute instant.
    pub fn set(&self, instant: DateTime<Utc>) {
        let mut now = self.now.lock().expect("clock mutex poisoned");
        *now = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }
}
