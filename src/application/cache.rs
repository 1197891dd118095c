//! Versioned JSON cache over the remote store.
//!
//! Reads distinguish a hit, a miss and a backend error so callers can tell an
//! empty cache from a broken one. The `get`/`set`/`del` wrappers collapse that
//! distinction for callers that do not care.

use crate::application::metrics::MetricsRegistry;
use crate::application::ports::{KvStore, StoreError};
use crate::domain::metric::{labels, Labels};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors from cache operations.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No backend is configured
    #[error("cache backend is not configured")]
    NotConfigured,

    /// The backend failed
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The value could not be encoded
    #[error("cache payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of a cache read.
#[derive(Debug)]
pub enum CacheResult<T> {
    Hit(T),
    Miss,
    Error(CacheError),
}

impl<T> CacheResult<T> {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheResult::Hit(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, CacheResult::Miss)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CacheResult::Error(_))
    }

    /// The cached value, treating misses and errors alike.
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheResult::Hit(value) => Some(value),
            CacheResult::Miss | CacheResult::Error(_) => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> CacheResult<U> {
        match self {
            CacheResult::Hit(value) => CacheResult::Hit(f(value)),
            CacheResult::Miss => CacheResult::Miss,
            CacheResult::Error(e) => CacheResult::Error(e),
        }
    }
}

/// Outcome of a cache write or delete.
pub type CacheWriteResult = Result<(), CacheError>;

/// Retry schedule for background write-backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteBackRetry {
    /// Total attempts, the first one included
    pub attempts: u32,
    /// Delay before the second attempt, doubled after each failure
    pub initial_backoff: Duration,
}

impl Default for WriteBackRetry {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(50),
        }
    }
}

/// JSON cache client.
///
/// Cloning is cheap and clones share the backend.
#[derive(Debug, Clone)]
pub struct CacheClient {
    store: Option<Arc<dyn KvStore>>,
    metrics: MetricsRegistry,
    retry: WriteBackRetry,
}

impl CacheClient {
    /// Create a client. Pass `None` when no backend is configured.
    pub fn new(store: Option<Arc<dyn KvStore>>, metrics: MetricsRegistry) -> Self {
        Self {
            store,
            metrics,
            retry: WriteBackRetry::default(),
        }
    }

    /// Override the write-back retry schedule.
    pub fn with_write_back_retry(mut self, retry: WriteBackRetry) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.store.is_some()
    }

    /// Read and decode `key`.
    ///
    /// An unconfigured backend and an undecodable payload are both misses.
    pub async fn get_result<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let Some(store) = &self.store else {
            self.metrics.increment("cache_miss_total", Labels::new());
            return CacheResult::Miss;
        };

        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                self.metrics.increment("cache_miss_total", Labels::new());
                return CacheResult::Miss;
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache read failed");
                self.count_error("get");
                return CacheResult::Error(e.into());
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                self.metrics.increment("cache_hit_total", Labels::new());
                CacheResult::Hit(value)
            }
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Ignoring undecodable cache payload");
                self.metrics.increment("cache_miss_total", Labels::new());
                CacheResult::Miss
            }
        }
    }

    /// Encode and write `value` under `key` with a time-to-live.
    pub async fn set_result<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> CacheWriteResult {
        let store = self.store.as_ref().ok_or(CacheError::NotConfigured)?;
        let payload = serde_json::to_string(value)?;

        store.set(key, &payload, ttl).await.map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Cache write failed");
            self.count_error("set");
            CacheError::from(e)
        })
    }

    /// Delete `key`.
    pub async fn del_result(&self, key: &str) -> CacheWriteResult {
        let store = self.store.as_ref().ok_or(CacheError::NotConfigured)?;

        store.del(key).await.map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Cache delete failed");
            self.count_error("del");
            CacheError::from(e)
        })
    }

    /// Read `key`, treating errors as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_result(key).await.into_option()
    }

    /// Write `value`, reporting only whether it succeeded.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        self.set_result(key, value, ttl).await.is_ok()
    }

    /// Delete `key`, reporting only whether it succeeded.
    pub async fn del(&self, key: &str) -> bool {
        self.del_result(key).await.is_ok()
    }

    /// Return the cached value for `key`, or compute it.
    ///
    /// On a miss or a read error, `calculate` runs and its value is returned
    /// right away; the write-back happens in a detached task. Errors from
    /// `calculate` are returned unchanged and nothing is cached.
    pub async fn cache_or_calculate<T, E, F, Fut>(
        &self,
        key: &str,
        calculate: F,
        ttl: Duration,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let CacheResult::Hit(value) = self.get_result(key).await {
            return Ok(value);
        }

        let value = calculate().await?;

        match serde_json::to_string(&value) {
            Ok(payload) => {
                self.spawn_write_back(key.to_string(), payload, ttl);
            }
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Computed value is not cacheable");
            }
        }

        Ok(value)
    }

    /// Write an encoded payload in the background with bounded retry.
    ///
    /// Returns `None` when there is no backend or no tokio runtime to run on.
    pub(crate) fn spawn_write_back(
        &self,
        key: String,
        payload: String,
        ttl: Duration,
    ) -> Option<JoinHandle<()>> {
        let store = Arc::clone(self.store.as_ref()?);

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::debug!(key = %key, "No runtime for cache write-back, skipping");
                return None;
            }
        };

        let metrics = self.metrics.clone();
        let retry = self.retry;

        Some(runtime.spawn(async move {
            let mut backoff = retry.initial_backoff;

            for attempt in 1..=retry.attempts.max(1) {
                match store.set(&key, &payload, ttl).await {
                    Ok(()) => return,
                    Err(e) if attempt >= retry.attempts => {
                        tracing::warn!(
                            key = %key,
                            error = %e,
                            attempts = attempt,
                            "Cache write-back gave up"
                        );
                        metrics.increment("cache_error_total", labels([("op", "write_back")]));
                    }
                    Err(e) => {
                        tracing::debug!(key = %key, error = %e, attempt, "Cache write-back failed, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.saturating_mul(2);
                    }
                }
            }
        }))
    }

    fn count_error(&self, op: &str) {
        self.metrics
            .increment("cache_error_total", labels([("op", op)]));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache_key::make_cache_key;
    use crate::infrastructure::mocks::{MockClock, MockStore};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Reading {
        sign: String,
        degree: f64,
    }

    fn reading() -> Reading {
        Reading {
            sign: "taurus".to_string(),
            degree: 24.5,
        }
    }

    fn client() -> (CacheClient, MockStore, MockClock, MetricsRegistry) {
        let clock = MockClock::default();
        let store = MockStore::new(Arc::new(clock.clone()));
        let metrics = MetricsRegistry::new();
        let cache = CacheClient::new(Some(Arc::new(store.clone())), metrics.clone());
        (cache, store, clock, metrics)
    }

    #[tokio::test]
    async fn test_hit_miss_and_error_are_distinct() {
        let (cache, store, _, metrics) = client();

        assert!(cache.get_result::<Reading>("k").await.is_miss());

        assert!(cache.set_result("k", &reading(), Duration::from_secs(60)).await.is_ok());
        match cache.get_result::<Reading>("k").await {
            CacheResult::Hit(value) => assert_eq!(value, reading()),
            other => panic!("expected hit, got {other:?}"),
        }

        store.set_failing(true);
        assert!(matches!(
            cache.get_result::<Reading>("k").await,
            CacheResult::Error(CacheError::Store(StoreError::Connection(_)))
        ));

        assert_eq!(metrics.counter_value("cache_hit_total", &Labels::new()), Some(1.0));
        assert_eq!(metrics.counter_value("cache_miss_total", &Labels::new()), Some(1.0));
        assert_eq!(
            metrics.counter_value("cache_error_total", &labels([("op", "get")])),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_unconfigured_backend() {
        let cache = CacheClient::new(None, MetricsRegistry::new());

        assert!(cache.get_result::<Reading>("k").await.is_miss());
        assert!(matches!(
            cache.set_result("k", &reading(), Duration::from_secs(1)).await,
            Err(CacheError::NotConfigured)
        ));
        assert!(matches!(cache.del_result("k").await, Err(CacheError::NotConfigured)));
        assert!(!cache.set("k", &reading(), Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_miss() {
        let (cache, store, _, _) = client();
        store.insert_raw("legacy", "{\"sun\":\"taurus\"}");
        store.insert_raw("garbage", "not json");

        assert!(cache.get_result::<Reading>("legacy").await.is_miss());
        assert!(cache.get_result::<Reading>("garbage").await.is_miss());
    }

    #[tokio::test]
    async fn test_ttl_expiry_and_delete() {
        let (cache, _, clock, _) = client();

        assert!(cache.set("k", &1u32, Duration::from_secs(10)).await);
        assert_eq!(cache.get::<u32>("k").await, Some(1));

        clock.advance(Duration::from_secs(10));
        assert_eq!(cache.get::<u32>("k").await, None);

        assert!(cache.set("k", &2u32, Duration::from_secs(10)).await);
        assert!(cache.del("k").await);
        assert_eq!(cache.get::<u32>("k").await, None);
    }

    #[tokio::test]
    async fn test_version_bump_isolates_entries() {
        let (cache, _, _, _) = client();
        let v1 = make_cache_key("profile", [("user", "7")], 1);
        let v2 = make_cache_key("profile", [("user", "7")], 2);

        assert!(cache.set(&v1, &reading(), Duration::from_secs(60)).await);
        assert_eq!(cache.get::<Reading>(&v2).await, None);
        assert_eq!(cache.get::<Reading>(&v1).await, Some(reading()));
    }

    #[tokio::test]
    async fn test_cache_or_calculate_writes_back() {
        let (cache, store, _, _) = client();

        let first: Result<Reading, String> = cache
            .cache_or_calculate("k", || async { Ok(reading()) }, Duration::from_secs(60))
            .await;
        assert_eq!(first.unwrap(), reading());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.raw("k").is_some());

        let second: Result<Reading, String> = cache
            .cache_or_calculate(
                "k",
                || async { Err("must not run".to_string()) },
                Duration::from_secs(60),
            )
            .await;
        assert_eq!(second.unwrap(), reading());
    }

    #[tokio::test]
    async fn test_cache_or_calculate_propagates_errors() {
        let (cache, store, _, _) = client();

        let result: Result<Reading, &str> = cache
            .cache_or_calculate("k", || async { Err("ephemeris missing") }, Duration::from_secs(60))
            .await;

        assert_eq!(result.unwrap_err(), "ephemeris missing");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_back_retries_then_gives_up() {
        let (cache, store, _, metrics) = client();
        store.set_failing(true);

        let handle = cache
            .spawn_write_back("k".to_string(), "1".to_string(), Duration::from_secs(60))
            .unwrap();
        handle.await.unwrap();

        assert_eq!(store.calls(), 3);
        assert_eq!(
            metrics.counter_value("cache_error_total", &labels([("op", "write_back")])),
            Some(1.0)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_back_recovers() {
        let (cache, store, _, _) = client();
        store.set_failing(true);

        let handle = cache
            .spawn_write_back("k".to_string(), "1".to_string(), Duration::from_secs(60))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(10)).await;
        store.set_failing(false);
        handle.await.unwrap();

        assert_eq!(store.raw("k").as_deref(), Some("1"));
        assert_eq!(store.calls(), 2);
    }
}
