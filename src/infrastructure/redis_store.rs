//! Redis-backed remote store.
//!
//! Shared by the cache and the rate limiter so that every application instance
//! sees the same entries and counters.
//!
//! ## Behavior
//!
//! - Connection pooling and reconnection via `redis::aio::ConnectionManager`,
//!   with capped exponential backoff between reconnect attempts
//! - Every command is bounded by `op_timeout`; an expired deadline surfaces as
//!   `StoreError::Timeout` and callers fall back
//! - Window counters use one `MULTI`/`EXEC` block: `INCR`, `PEXPIRE .. NX`,
//!   `PTTL`. `NX` on expire commands requires Redis 7 or newer.
//! - `LazyRedisStore` lets a process start while Redis is down: commands fail
//!   fast until a background task connects.
//!
//! ## Example
//!
//! ```rust,ignore
//! use resilience_kit::{RedisStore, RedisStoreConfig};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RedisStoreConfig {
//!         op_timeout: Duration::from_secs(1),
//!         ..RedisStoreConfig::default()
//!     };
//!
//!     let store = RedisStore::connect_with_config("redis://127.0.0.1/", config)
//!         .await
//!         .expect("Failed to connect to Redis");
//! }
//! ```

use crate::application::ports::{KvStore, StoreError};
use crate::domain::rate_limit::WindowCount;
use async_trait::async_trait;
use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::{AsyncCommands, Client, RedisError, RedisResult};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

const RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(250);

/// Configuration for the Redis store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    /// Deadline for establishing a connection (default: 5 seconds)
    pub connect_timeout: Duration,
    /// Deadline for each command (default: 5 seconds)
    pub op_timeout: Duration,
    /// Reconnect attempts before a command fails (default: 5)
    pub max_retries: usize,
    /// Upper bound on the delay between reconnect attempts (default: 2 seconds)
    pub max_retry_delay: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            op_timeout: Duration::from_secs(5),
            max_retries: 5,
            max_retry_delay: Duration::from_secs(2),
        }
    }
}

/// Redis implementation of the `KvStore` port.
///
/// Cloning is cheap; clones share the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Errors
    /// Returns `StoreError::Connection` if the URL is invalid or the server is
    /// unreachable, `StoreError::Timeout` if connecting takes too long.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RedisStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    pub async fn connect_with_config(url: &str, config: RedisStoreConfig) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;

        let manager_config = ConnectionManagerConfig::new()
            .set_number_of_retries(config.max_retries)
            .set_max_delay(config.max_retry_delay.as_millis() as u64)
            .set_connection_timeout(config.connect_timeout)
            .set_response_timeout(config.op_timeout);

        let connection = tokio::time::timeout(
            config.connect_timeout,
            ConnectionManager::new_with_config(client, manager_config),
        )
        .await
        .map_err(|_| StoreError::Timeout(config.connect_timeout))?
        .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::debug!(op_timeout = ?config.op_timeout, "Connected to Redis");

        Ok(Self { connection, config })
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::debug!(op, error = %e, "Redis command failed");
                Err(classify(e))
            }
            Err(_) => Err(StoreError::Timeout(self.config.op_timeout)),
        }
    }
}

/// Redis store that may still be connecting.
///
/// Commands issued before a connection exists fail fast with
/// `StoreError::Connection`, which the cache and rate limiter treat like any
/// other outage. `spawn_connect` keeps retrying in the background until the
/// server answers.
#[derive(Clone)]
pub struct LazyRedisStore {
    url: String,
    config: RedisStoreConfig,
    connected: Arc<OnceCell<RedisStore>>,
}

impl fmt::Debug for LazyRedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRedisStore")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl LazyRedisStore {
    /// Create an unconnected store.
    ///
    /// # Errors
    /// Returns `StoreError::Connection` if the URL cannot be parsed.
    pub fn new(url: &str, config: RedisStoreConfig) -> Result<Self, StoreError> {
        Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self {
            url: url.to_string(),
            config,
            connected: Arc::new(OnceCell::new()),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.initialized()
    }

    /// Make one connection attempt unless already connected.
    pub async fn try_connect(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            return Ok(());
        }
        let store = RedisStore::connect_with_config(&self.url, self.config.clone()).await?;
        if self.connected.set(store).is_ok() {
            tracing::info!("Redis connection established");
        }
        Ok(())
    }

    /// Retry `try_connect` with capped exponential backoff until it succeeds.
    pub fn spawn_connect(&self) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut delay = RECONNECT_INITIAL_DELAY;
            while let Err(e) = store.try_connect().await {
                tracing::warn!(error = %e, retry_in = ?delay, "Redis unavailable, retrying");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(store.config.max_retry_delay.max(RECONNECT_INITIAL_DELAY));
            }
        })
    }

    fn store(&self) -> Result<&RedisStore, StoreError> {
        self.connected
            .get()
            .ok_or_else(|| StoreError::Connection("not connected yet".to_string()))
    }
}

#[async_trait]
impl KvStore for LazyRedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.store()?.get(key).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.store()?.set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.store()?.del(key).await
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        self.store()?.incr_window(key, window).await
    }
}

fn classify(e: RedisError) -> StoreError {
    if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout() {
        StoreError::Connection(e.to_string())
    } else {
        StoreError::Command(e.to_string())
    }
}

fn millis(d: Duration) -> u64 {
    (d.as_millis() as u64).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        self.bounded("get", async move { conn.get(key).await }).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let ttl_ms = millis(ttl);

        self.bounded("set", async move {
            let _: () = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_ms)
                .query_async(&mut conn)
                .await?;
            Ok(())
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        self.bounded("del", async move {
            let _: () = conn.del(key).await?;
            Ok(())
        })
        .await
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount, StoreError> {
        let mut conn = self.connection.clone();
        let window_ms = millis(window);

        let (count, pttl): (u64, i64) = self
            .bounded("incr_window", async move {
                redis::pipe()
                    .atomic()
                    .cmd("INCR")
                    .arg(key)
                    .cmd("PEXPIRE")
                    .arg(key)
                    .arg(window_ms)
                    .arg("NX")
                    .ignore()
                    .cmd("PTTL")
                    .arg(key)
                    .query_async(&mut conn)
                    .await
            })
            .await?;

        // -1 (no expiry) and -2 (gone) both mean a fresh window
        let ttl_ms = if pttl > 0 { pttl as u64 } else { window_ms };

        Ok(WindowCount {
            count,
            ttl: Duration::from_millis(ttl_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisStoreConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.op_timeout, Duration::from_secs(5));
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_millis_never_zero() {
        assert_eq!(millis(Duration::ZERO), 1);
        assert_eq!(millis(Duration::from_secs(60)), 60_000);
    }

    #[tokio::test]
    async fn test_invalid_url_is_connection_error() {
        let result = RedisStore::connect("not-a-redis-url").await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[test]
    fn test_lazy_store_rejects_invalid_url() {
        let result = LazyRedisStore::new("not-a-redis-url", RedisStoreConfig::default());
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[tokio::test]
    async fn test_lazy_store_fails_fast_before_connecting() {
        let store = LazyRedisStore::new("redis://127.0.0.1:1/", RedisStoreConfig::default()).unwrap();
        assert!(!store.is_connected());

        assert!(matches!(store.get("k").await, Err(StoreError::Connection(_))));
        assert!(matches!(
            store.incr_window("k", Duration::from_secs(60)).await,
            Err(StoreError::Connection(_))
        ));
    }
}
