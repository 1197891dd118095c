//! In-process rate limit windows.
//!
//! Used when the remote store fails. Counts are per process, so a fleet of N
//! instances admits up to N times the configured limit while degraded.

use crate::application::ports::Storage;
use crate::domain::rate_limit::RateLimitWindow;
use crate::infrastructure::storage::ShardedStorage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default time between sweeps of expired windows.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Fixed windows keyed by limiter key, swept on a fixed cadence.
///
/// The sweep cadence is independent of any window's length, so an expired
/// window may stay in memory for up to one cleanup interval. It is never
/// counted as live: `increment` restarts an expired window before counting.
#[derive(Debug, Clone)]
pub struct LocalWindows {
    windows: Arc<ShardedStorage<String, RateLimitWindow>>,
    cleanup_interval_ms: u64,
    last_sweep_ms: Arc<AtomicU64>,
}

impl LocalWindows {
    pub fn new(cleanup_interval: Duration) -> Self {
        Self {
            windows: Arc::new(ShardedStorage::new()),
            cleanup_interval_ms: cleanup_interval.as_millis() as u64,
            last_sweep_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Count one request for `key` and return the window after counting.
    ///
    /// Runs a sweep first when the cleanup interval has elapsed.
    pub fn increment(&self, key: &str, now_ms: u64, window_ms: u64) -> RateLimitWindow {
        self.maybe_sweep(now_ms);

        self.windows.with_entry_mut(
            key.to_string(),
            || RateLimitWindow::open(now_ms, window_ms),
            |window| {
                window.increment(now_ms, window_ms);
                *window
            },
        )
    }

    /// Sweep if at least one cleanup interval passed since the last sweep.
    ///
    /// Returns the number of windows removed. Only one caller wins the race
    /// for a given interval.
    pub fn maybe_sweep(&self, now_ms: u64) -> usize {
        let last = self.last_sweep_ms.load(Ordering::Acquire);
        if now_ms.saturating_sub(last) < self.cleanup_interval_ms {
            return 0;
        }

        if self
            .last_sweep_ms
            .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return 0;
        }

        self.sweep(now_ms)
    }

    /// Remove every window that has ended by `now_ms`.
    pub fn sweep(&self, now_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now_ms));
        let removed = before.saturating_sub(self.windows.len());

        if removed > 0 {
            tracing::debug!(removed, "Swept expired rate limit windows");
        }
        removed
    }

    /// Current window for `key`, expired or not.
    pub fn window(&self, key: &str) -> Option<RateLimitWindow> {
        self.windows.with_entry(&key.to_string(), |window| *window)
    }

    /// Number of tracked windows, expired ones included.
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn clear(&self) {
        self.windows.clear();
    }
}

impl Default for LocalWindows {
    fn default() -> Self {
        Self::new(DEFAULT_CLEANUP_INTERVAL)
    }
}
