//! Mock clock for testing.

use crate::application::ports::Clock;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly. Monotonic and
/// wall-clock readings always move together.
///
/// # Examples
///
/// ```
/// use resilience_kit::infrastructure::mocks::MockClock;
/// use resilience_kit::application::ports::Clock;
/// use std::time::{Duration, Instant};
///
/// let start = Instant::now();
/// let clock = MockClock::new(start);
/// let wall = clock.system_time();
///
/// clock.advance(Duration::from_secs(10));
/// assert_eq!(clock.now(), start + Duration::from_secs(10));
/// assert_eq!(clock.system_time(), wall + Duration::from_secs(10));
/// ```
///
/// # Thread Safety
///
/// All clones share the same underlying time, so advancing one clone
/// advances all of them.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<(Instant, SystemTime)>>,
}

impl MockClock {
    /// Create a mock clock starting at a specific instant and the current wall time.
    pub fn new(start: Instant) -> Self {
        Self::with_system_time(start, SystemTime::now())
    }

    /// Create a mock clock with explicit monotonic and wall-clock starting points.
    pub fn with_system_time(start: Instant, wall: SystemTime) -> Self {
        Self {
            current: Arc::new(Mutex::new((start, wall))),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, duration: Duration) {
        let mut current = self
            .current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock");
        current.0 += duration;
        current.1 += duration;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(Instant::now())
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
            .0
    }

    fn system_time(&self) -> SystemTime {
        self.current
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
            .1
    }
}
