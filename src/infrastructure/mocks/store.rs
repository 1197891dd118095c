//! In-memory remote store double.

use crate::application::ports::{Clock, KvStore, StoreError};
use crate::domain::rate_limit::WindowCount;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

/// Mock key-value store with TTLs driven by a `Clock` and switchable failures.
///
/// Clones share the same data and failure switch, so a test can hand one
/// clone to the code under test and keep another to inspect or break it.
///
/// # Examples
///
/// ```
/// use resilience_kit::infrastructure::mocks::{MockClock, MockStore};
/// use resilience_kit::application::ports::KvStore;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// # tokio_test_block_on(async {
/// let clock = Arc::new(MockClock::default());
/// let store = MockStore::new(clock.clone());
///
/// store.set("k", "v", Duration::from_secs(5)).await.unwrap();
/// assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
///
/// clock.advance(Duration::from_secs(5));
/// assert_eq!(store.get("k").await.unwrap(), None);
///
/// store.set_failing(true);
/// assert!(store.get("k").await.is_err());
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MockStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    clock: Arc<dyn Clock>,
    failing: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

impl MockStore {
    /// Create an empty store reading time from `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            clock,
            failing: Arc::new(AtomicBool::new(false)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make every subsequent call fail with a connection error, or recover.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of calls received, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Write a raw value without TTL, bypassing the failure switch.
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
    }

    /// Read a raw value, bypassing the failure switch.
    pub fn raw(&self, key: &str) -> Option<String> {
        let now = self.clock.now();
        self.lock()
            .get(key)
            .filter(|e| e.expires_at.map_or(true, |at| now < at))
            .map(|e| e.value.clone())
    }

    /// Number of stored keys, expired or not.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries
            .lock()
            .expect("MockStore mutex poisoned - a test thread panicked while holding the lock")
    }

    fn begin(&self) -> Result<Instant, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("mock store unavailable".to_string()));
        }
        Ok(self.clock.now())
    }
}

#[async_trait]
impl KvStore for MockStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.begin()?;
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at.is_some_and(|at| now >= at),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
            return Ok(None);
        }
        Ok(entries.get(key).map(|entry| entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = self.begin()?;
        self.lock().insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.begin()?;
        self.lock().remove(key);
        Ok(())
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let now = self.begin()?;
        let mut entries = self.lock();

        let live = entries
            .get(key)
            .filter(|e| e.expires_at.map_or(true, |at| now < at))
            .cloned();

        let (count, expires_at) = match live {
            Some(entry) => {
                let count = entry
                    .value
                    .parse::<u64>()
                    .map_err(|e| StoreError::Command(e.to_string()))?
                    + 1;
                (count, entry.expires_at.unwrap_or(now + window))
            }
            None => (1, now + window),
        };

        entries.insert(
            key.to_string(),
            Entry {
                value: count.to_string(),
                expires_at: Some(expires_at),
            },
        );

        Ok(WindowCount {
            count,
            ttl: expires_at.saturating_duration_since(now),
        })
    }
}
