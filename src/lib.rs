//! # resilience-kit
//!
//! Resilience and observability plumbing for service backends: per-dependency
//! circuit breakers, distributed fixed-window rate limiting with an in-memory
//! fallback, a metrics registry with Prometheus and OTLP exporters, and a
//! versioned JSON cache over Redis.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilience_kit::{Fallback, RateLimitOptions, ResilienceConfig, ResilienceServices};
//!
//! # async fn fetch_ephemeris() -> Result<String, std::io::Error> { Ok(String::new()) }
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let services = ResilienceServices::builder()
//!         .with_config(ResilienceConfig::from_env()?)
//!         .with_background_cleanup(true)
//!         .connect()
//!         .await?;
//!
//!     let decision = services
//!         .rate_limiter()
//!         .rate_limit("ip:203.0.113.7", RateLimitOptions::per_seconds(60, 60))
//!         .await;
//!     for (name, value) in decision.headers.iter() {
//!         println!("{name}: {value}");
//!     }
//!
//!     let outcome = services
//!         .circuit_breakers()
//!         .call("ephemeris", fetch_ephemeris, Fallback::value(String::new()))
//!         .await;
//!     if outcome.from_fallback {
//!         println!("serving degraded response");
//!     }
//!
//!     println!("{}", services.metrics().to_prometheus());
//!     Ok(())
//! }
//! ```
//!
//! ## Components
//!
//! ### Circuit breaker
//! One state machine per dependency name: `Closed` until `failure_threshold`
//! consecutive failures, `Open` until `reset_timeout` has passed since the last
//! failure, then `HalfOpen` for a limited number of probes. The first probe
//! success closes the circuit, the first probe failure reopens it.
//! `with_circuit_breaker` never returns the dependency's error; a failure, a
//! panic or an open circuit all resolve the fallback.
//!
//! ### Rate limiter
//! Fixed windows counted in the remote store with one atomic
//! `INCR`/`PEXPIRE NX`/`PTTL` block. Degraded modes:
//!
//! | Environment | Store | Behavior | `X-RateLimit-Policy` |
//! |-------------|-------|----------|----------------------|
//! | production | none | deny all | `enforced-no-backend` |
//! | development | none | allow all | `disabled-dev` |
//! | any | failing | count in memory | `in-memory-fallback` |
//! | any | healthy | enforce | (absent) |
//!
//! ### Metrics
//! Counters, gauges and timings keyed by name plus sorted labels. Timings keep
//! the last 1000 samples and report nearest-rank p50/p95/p99. Both exporters
//! sort their output, so identical state always renders identical text.
//!
//! ### Cache
//! `make_cache_key` builds `{prefix}:v{version}:{k}:{v}|...` keys with sorted
//! parameters; bumping the version is the only invalidation. Reads report
//! `Hit`, `Miss` or `Error`, and `cache_or_calculate` writes back in a detached
//! task so callers never wait on the store after a miss.
//!
//! ## Testing
//!
//! Enable the `test-helpers` feature to get `MockClock` and `MockStore`:
//!
//! ```toml
//! [dev-dependencies]
//! resilience-kit = { version = "*", features = ["test-helpers"] }
//! ```

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    cache_key::make_cache_key,
    chart::{ChartInput, CHART_CACHE_VERSION},
    circuit::{CircuitBreakerOptions, CircuitState, CircuitStatus},
    metric::{labels, Labels, MetricKey, TimingSummary, MAX_SAMPLES},
    rate_limit::{Environment, RateLimitHeaders, RateLimitOptions, RateLimitPolicy, RateLimitResult},
};

pub use application::{
    cache::{CacheClient, CacheError, CacheResult, CacheWriteResult, WriteBackRetry},
    chart_cache::{ChartCache, ChartEnvelope},
    circuit_breaker::{CircuitBreakerRegistry, CircuitOutcome, Fallback},
    metrics::{MetricsRegistry, MetricsSnapshot},
    ports::{Clock, KvStore, Storage, StoreError},
    rate_limiter::{RateLimiter, RateLimiterConfig},
};

pub use infrastructure::{
    clock::SystemClock,
    config::{ConfigError, ResilienceConfig},
    services::{BuildError, ResilienceServices, ResilienceServicesBuilder},
    storage::ShardedStorage,
};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{LazyRedisStore, RedisStore, RedisStoreConfig};
