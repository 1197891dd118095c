//! Distributed fixed-window rate limiting.
//!
//! The remote store holds the authoritative counters. When it fails, the
//! limiter keeps enforcing with per-process windows and marks the response
//! with the `in-memory-fallback` policy. Without any store configured the
//! deployment environment decides: production denies everything, development
//! allows everything.

use crate::application::local_windows::{LocalWindows, DEFAULT_CLEANUP_INTERVAL};
use crate::application::metrics::MetricsRegistry;
use crate::application::ports::{Clock, KvStore};
use crate::domain::metric::{labels, Labels};
use crate::domain::rate_limit::{
    unix_millis, Environment, RateLimitOptions, RateLimitPolicy, RateLimitResult, WindowCount,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Default namespace for remote counter keys.
pub const DEFAULT_KEY_PREFIX: &str = "ratelimit:";

/// Configuration for a `RateLimiter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Decides behavior when no store is configured
    pub environment: Environment,
    /// Prepended to every remote key
    pub key_prefix: String,
    /// Cadence of the local window sweep
    pub cleanup_interval: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

impl RateLimiterConfig {
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_cleanup_interval(mut self, cleanup_interval: Duration) -> Self {
        self.cleanup_interval = cleanup_interval;
        self
    }
}

/// Fixed-window rate limiter backed by an optional remote store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Option<Arc<dyn KvStore>>,
    local: LocalWindows,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
    config: RateLimiterConfig,
    misconfiguration_logged: Arc<AtomicBool>,
}

impl RateLimiter {
    /// Create a limiter. Pass `None` as `store` when no backend is configured.
    pub fn new(
        store: Option<Arc<dyn KvStore>>,
        clock: Arc<dyn Clock>,
        metrics: MetricsRegistry,
        config: RateLimiterConfig,
    ) -> Self {
        Self {
            store,
            local: LocalWindows::new(config.cleanup_interval),
            clock,
            metrics,
            config,
            misconfiguration_logged: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Whether a remote store is configured.
    pub fn has_backend(&self) -> bool {
        self.store.is_some()
    }

    /// Windows used while the remote store is failing.
    pub fn local_windows(&self) -> &LocalWindows {
        &self.local
    }

    /// Count one request for `key` and decide whether it is admitted.
    ///
    /// Never fails: backend errors degrade to the local windows.
    pub async fn rate_limit(&self, key: &str, options: RateLimitOptions) -> RateLimitResult {
        let now_ms = unix_millis(self.clock.system_time());
        let window_ms = options.window_millis();

        let Some(store) = &self.store else {
            return self.without_backend(key, options, now_ms, window_ms);
        };

        let remote_key = format!("{}{}", self.config.key_prefix, key);
        match store.incr_window(&remote_key, options.window).await {
            Ok(WindowCount { count, ttl }) => {
                let ttl_ms = match ttl.as_millis() as u64 {
                    0 => window_ms,
                    ms => ms,
                };
                let result = RateLimitResult::from_count(
                    count,
                    options.limit,
                    now_ms.saturating_add(ttl_ms),
                    now_ms,
                    None,
                );
                self.observe(key, &result);
                result
            }
            Err(e) => {
                tracing::warn!(
                    key = %key,
                    error = %e,
                    "Rate limit store unavailable, counting in memory"
                );
                self.metrics.increment("rate_limit_fallback_total", Labels::new());

                let window = self.local.increment(key, now_ms, window_ms);
                let result = RateLimitResult::from_count(
                    window.count,
                    options.limit,
                    window.reset_at,
                    now_ms,
                    Some(RateLimitPolicy::InMemoryFallback),
                );
                self.observe(key, &result);
                result
            }
        }
    }

    /// Start a background task that sweeps expired local windows on the
    /// configured cadence. Abort the handle to stop it.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        let local = self.local.clone();
        let clock = Arc::clone(&self.clock);
        let period = self.config.cleanup_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                ticker.tick().await;
                local.sweep(unix_millis(clock.system_time()));
            }
        })
    }

    fn without_backend(
        &self,
        key: &str,
        options: RateLimitOptions,
        now_ms: u64,
        window_ms: u64,
    ) -> RateLimitResult {
        let reset = now_ms.saturating_add(window_ms);

        if self.config.environment.is_production() {
            if !self.misconfiguration_logged.swap(true, Ordering::Relaxed) {
                tracing::error!(
                    "No rate limit store configured in production, denying all requests"
                );
            }
            self.metrics
                .increment("rate_limit_misconfigured_total", Labels::new());
            tracing::debug!(key = %key, "Request denied without rate limit store");
            return RateLimitResult::deny_all(
                options.limit,
                reset,
                now_ms,
                RateLimitPolicy::EnforcedNoBackend,
            );
        }

        RateLimitResult::allow_all(options.limit, reset, now_ms, RateLimitPolicy::DisabledDev)
    }

    fn observe(&self, key: &str, result: &RateLimitResult) {
        if !result.allowed {
            tracing::debug!(key = %key, limit = result.limit, "Rate limit exceeded");
            self.metrics
                .increment("rate_limit_exceeded_total", labels([("key", key)]));
        }
    }
}
