//! Injectable time source.
//!
//! Every TTL and expiry decision in the engine goes through a [`Clock`]
//! rather than calling `Utc::now()` directly, so tests can drive expiry
//! deterministically instead of sleeping through real TTLs.

use chrono::{DateTime, Utc};

/// A source of the current wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually controlled clocks for testing.
#[cfg(any(test, feature = "test-support"))]
pub mod test {
    use super::*;
    use std::sync::{Arc, RwLock};

    /// A clock whose time only moves when told to.
    ///
    /// Cheap to clone; clones share the same underlying instant.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        now: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at the given instant.
        #[must_use]
        pub fn at(now: DateTime<Utc>) -> Self {
            Self {
                now: Arc::new(RwLock::new(now)),
            }
        }

        /// Create a clock frozen at the current system time.
        #[must_use]
        pub fn from_system() -> Self {
            Self::at(Utc::now())
        }

        /// Move the clock forward.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, duration: chrono::Duration) {
            let mut now = self.now.write().unwrap();
            *now += duration;
        }

        /// Set the clock to an absolute instant.
        #[allow(clippy::unwrap_used)]
        pub fn set(&self, instant: DateTime<Utc>) {
            *self.now.write().unwrap() = instant;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.now.read().unwrap()
        }
    }
}
