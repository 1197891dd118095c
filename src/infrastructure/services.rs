//! Assembly of the long-lived resilience components.
//!
//! `ResilienceServices` owns one instance of each registry for the lifetime
//! of the process. Callers receive clones (all components are cheap handles
//! over shared state) instead of reaching for globals.

use crate::application::cache::CacheClient;
use crate::application::chart_cache::ChartCache;
use crate::application::circuit_breaker::CircuitBreakerRegistry;
use crate::application::metrics::MetricsRegistry;
use crate::application::ports::{Clock, KvStore, StoreError};
use crate::application::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::config::ResilienceConfig;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;

/// Errors from assembling the services.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Circuit failure threshold must be greater than zero
    #[error("circuit failure_threshold must be greater than 0")]
    ZeroFailureThreshold,

    /// Half-open probe budget must be greater than zero
    #[error("circuit half_open_max_attempts must be greater than 0")]
    ZeroHalfOpenAttempts,

    /// Local window cleanup interval must be greater than zero
    #[error("rate limit cleanup_interval must be greater than 0")]
    ZeroCleanupInterval,

    /// Remote command timeout must be greater than zero
    #[error("op_timeout must be greater than 0")]
    ZeroOpTimeout,

    /// Connecting to the configured remote store failed
    #[error("remote store unavailable: {0}")]
    Store(#[from] StoreError),
}

/// Long-lived owner of the resilience components.
#[derive(Debug)]
pub struct ResilienceServices {
    config: ResilienceConfig,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
    circuit_breakers: CircuitBreakerRegistry,
    rate_limiter: RateLimiter,
    cache: CacheClient,
    chart_cache: ChartCache,
    cleanup_task: Option<JoinHandle<()>>,
    connect_task: Option<JoinHandle<()>>,
}

impl ResilienceServices {
    /// Create a builder with default configuration.
    pub fn builder() -> ResilienceServicesBuilder {
        ResilienceServicesBuilder::new()
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn metrics(&self) -> &MetricsRegistry {
        &self.metrics
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.circuit_breakers
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn cache(&self) -> &CacheClient {
        &self.cache
    }

    pub fn chart_cache(&self) -> &ChartCache {
        &self.chart_cache
    }

    /// Whether the background window sweep is running.
    pub fn has_cleanup_task(&self) -> bool {
        self.cleanup_task.is_some()
    }

    /// Whether the remote store is still being connected in the background.
    pub fn is_connecting(&self) -> bool {
        self.connect_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stop background work.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.cleanup_task.take() {
            task.abort();
            tracing::debug!("Stopped rate limit cleanup task");
        }
        if let Some(task) = self.connect_task.take() {
            task.abort();
            tracing::debug!("Stopped remote store connect task");
        }
    }
}

impl Drop for ResilienceServices {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Builder for `ResilienceServices`.
#[derive(Debug)]
pub struct ResilienceServicesBuilder {
    config: ResilienceConfig,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn KvStore>>,
    spawn_cleanup: bool,
}

impl ResilienceServicesBuilder {
    fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
            clock: None,
            store: None,
            spawn_cleanup: false,
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Use a custom clock (e.g. `MockClock` in tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use an already connected remote store.
    ///
    /// Takes precedence over `redis_url` in the configuration.
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run the local window sweep as a background task.
    ///
    /// Requires a tokio runtime when building.
    pub fn with_background_cleanup(mut self, enabled: bool) -> Self {
        self.spawn_cleanup = enabled;
        self
    }

    /// Build with the store given to `with_store`, if any.
    ///
    /// # Errors
    /// Returns `BuildError` if the configuration is invalid.
    pub fn build(self) -> Result<ResilienceServices, BuildError> {
        self.validate()?;
        let store = self.store.clone();
        Ok(self.assemble(store))
    }

    /// Build, connecting to `redis_url` when no store was given.
    ///
    /// An unreachable server does not fail the build: the store reports
    /// connection errors, so the cache misses and the rate limiter counts in
    /// memory, while a background task keeps trying to connect.
    ///
    /// # Errors
    /// Returns `BuildError::Store` if `redis_url` cannot be parsed.
    #[cfg(feature = "redis-storage")]
    pub async fn connect(self) -> Result<ResilienceServices, BuildError> {
        use crate::infrastructure::redis_store::{LazyRedisStore, RedisStoreConfig};

        self.validate()?;

        let mut connect_task = None;
        let store = match (&self.store, &self.config.redis_url) {
            (Some(store), _) => Some(Arc::clone(store)),
            (None, Some(url)) => {
                let redis_config = RedisStoreConfig {
                    connect_timeout: self.config.connect_timeout,
                    op_timeout: self.config.op_timeout,
                    ..RedisStoreConfig::default()
                };
                let store = LazyRedisStore::new(url, redis_config)?;
                if let Err(e) = store.try_connect().await {
                    tracing::warn!(error = %e, "Redis unreachable at startup, degrading until it connects");
                    connect_task = Some(store.spawn_connect());
                }
                Some(Arc::new(store) as Arc<dyn KvStore>)
            }
            (None, None) => None,
        };

        let mut services = self.assemble(store);
        services.connect_task = connect_task;
        Ok(services)
    }

    fn validate(&self) -> Result<(), BuildError> {
        if self.config.circuit_defaults.failure_threshold == 0 {
            return Err(BuildError::ZeroFailureThreshold);
        }
        if self.config.circuit_defaults.half_open_max_attempts == 0 {
            return Err(BuildError::ZeroHalfOpenAttempts);
        }
        if self.config.cleanup_interval.is_zero() {
            return Err(BuildError::ZeroCleanupInterval);
        }
        if self.config.op_timeout.is_zero() {
            return Err(BuildError::ZeroOpTimeout);
        }
        Ok(())
    }

    fn assemble(self, store: Option<Arc<dyn KvStore>>) -> ResilienceServices {
        let config = self.config;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()));
        let metrics = MetricsRegistry::with_service_name(config.service_name.clone());

        if store.is_none() {
            if config.environment.is_production() {
                tracing::error!("No remote store configured in production");
            } else {
                tracing::info!("No remote store configured, caching and rate limiting disabled");
            }
        }

        let circuit_breakers = CircuitBreakerRegistry::with_default_options(
            Arc::clone(&clock),
            metrics.clone(),
            config.circuit_defaults.clone(),
        );

        let rate_limiter = RateLimiter::new(
            store.clone(),
            Arc::clone(&clock),
            metrics.clone(),
            RateLimiterConfig::default()
                .with_environment(config.environment)
                .with_key_prefix(config.rate_limit_key_prefix.clone())
                .with_cleanup_interval(config.cleanup_interval),
        );

        let cache = CacheClient::new(store, metrics.clone());
        let chart_cache = ChartCache::new(cache.clone(), Arc::clone(&clock), metrics.clone());

        let cleanup_task = self.spawn_cleanup.then(|| rate_limiter.spawn_cleanup());

        ResilienceServices {
            config,
            clock,
            metrics,
            circuit_breakers,
            rate_limiter,
            cache,
            chart_cache,
            cleanup_task,
            connect_task: None,
        }
    }
}
