//! # Wishlist Testing
//!
//! Testing utilities for the wishlist coordination engine.
//!
//! This crate provides:
//! - Deterministic clocks for the `Clock` environment trait
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//! - Assertion helpers for effect lists
//!
//! ## Example
//!
//! ```ignore
//! use wishlist_testing::{ReducerTest, test_clock};
//!
//! ReducerTest::new(ListViewReducer)
//!     .with_env(test_environment())
//!     .given_state(ready_state())
//!     .when_action(ListViewAction::Claim { op, item_id })
//!     .then_state(|state| assert!(state.last_error.is_none()))
//!     .run();
//! ```

use chrono::{DateTime, Duration, Utc};
use wishlist_core::environment::Clock;


/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::Mutex;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time.
    ///
    /// # Example
    ///
    /// ```
    /// use wishlist_testing::mocks::FixedClock;
    /// use wishlist_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that moves forward by a fixed step on every reading
    ///
    /// Rows stamped by a `SteppingClock` get strictly increasing
    /// `created_at` values, which makes "earliest wins" ordering testable.
    ///
    /// ```
    /// use wishlist_testing::mocks::SteppingClock;
    /// use wishlist_core::environment::Clock;
    ///
    /// let clock = SteppingClock::default();
    /// assert!(clock.now() < clock.now());
    /// ```
    #[derive(Debug)]
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
        step: Duration,
    }

    impl SteppingClock {
        /// Start at `start`, advancing by `step` per reading
        #[must_use]
        pub const fn new(start: DateTime<Utc>, step: Duration) -> Self {
            Self {
                next: Mutex::new(start),
                step,
            }
        }
    }

    impl Default for SteppingClock {
        fn default() -> Self {
            Self::new(super::epoch(), Duration::seconds(1))
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut next = match self.next.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let now = *next;
            *next = now + self.step;
            now
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::epoch())
    }
}

/// 2025-01-01 00:00:00 UTC
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen.
#[must_use]
#[allow(clippy::expect_used)]
pub fn epoch() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .expect("hardcoded timestamp should always parse")
        .with_timezone(&Utc)
}

pub use mocks::{FixedClock, SteppingClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_never_moves() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now(), epoch());
    }

    #[test]
    fn stepping_clock_advances_by_step() {
        let clock = SteppingClock::new(epoch(), Duration::milliseconds(250));
        let first = clock.now();
        let second = clock.now();
        assert_eq!(second - first, Duration::milliseconds(250));
    }
}
