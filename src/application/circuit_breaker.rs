//! Per-dependency circuit breakers.
//!
//! One `CircuitRecord` per dependency name, created lazily and kept for the
//! lifetime of the registry. Calls wrapped with `with_circuit_breaker` never
//! surface the dependency's error: a failing or short-circuited call resolves
//! the fallback instead.

use crate::application::metrics::MetricsRegistry;
use crate::application::ports::{Clock, Storage};
use crate::domain::circuit::{
    CircuitBreakerOptions, CircuitRecord, CircuitState, CircuitStatus, Transition,
};
use crate::domain::metric::labels;
use crate::infrastructure::storage::ShardedStorage;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::fmt::Display;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Value produced when a call is short-circuited or fails.
///
/// Always a zero-argument producer; plain values are wrapped.
pub struct Fallback<T> {
    produce: Box<dyn FnOnce() -> BoxFuture<'static, T> + Send>,
}

impl<T: Send + 'static> Fallback<T> {
    /// Fallback to a fixed value.
    pub fn value(value: T) -> Self {
        Self::from_fn(move || value)
    }

    /// Fallback computed synchronously when needed.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self {
            produce: Box::new(move || async move { f() }.boxed()),
        }
    }

    /// Fallback computed asynchronously when needed.
    pub fn from_async<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        Self {
            produce: Box::new(move || f().boxed()),
        }
    }

    async fn resolve(self) -> T {
        (self.produce)().await
    }
}

impl<T> fmt::Debug for Fallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallback").finish_non_exhaustive()
    }
}

/// Result of a guarded call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOutcome<T> {
    pub result: T,
    /// True when `result` came from the fallback
    pub from_fallback: bool,
}

/// Registry of circuits keyed by dependency name.
///
/// Cloning is cheap and clones share the circuit table.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    circuits: Arc<ShardedStorage<String, CircuitRecord>>,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
    default_options: CircuitBreakerOptions,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry.
    pub fn new(clock: Arc<dyn Clock>, metrics: MetricsRegistry) -> Self {
        Self::with_default_options(clock, metrics, CircuitBreakerOptions::default())
    }

    /// Create an empty registry with custom default options.
    pub fn with_default_options(
        clock: Arc<dyn Clock>,
        metrics: MetricsRegistry,
        default_options: CircuitBreakerOptions,
    ) -> Self {
        Self {
            circuits: Arc::new(ShardedStorage::new()),
            clock,
            metrics,
            default_options,
        }
    }

    /// Options used by callers that do not pass their own.
    pub fn default_options(&self) -> &CircuitBreakerOptions {
        &self.default_options
    }

    /// Whether calls to `name` must be short-circuited.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here, and
    /// each admitted half-open call consumes one probe attempt.
    pub fn is_circuit_open(&self, name: &str, options: &CircuitBreakerOptions) -> bool {
        self.admit(name, options).0
    }

    /// Returns `(open, probe)`; `probe` is set when a half-open attempt was consumed.
    fn admit(&self, name: &str, options: &CircuitBreakerOptions) -> (bool, bool) {
        let now = self.clock.now();
        let (open, transition) = self.circuits.with_entry_mut(
            name.to_string(),
            CircuitRecord::new,
            |record| record.poll_open(now, options),
        );
        self.observe(name, transition);
        (open, !open && transition.to == CircuitState::HalfOpen)
    }

    fn release_probe(&self, name: &str) {
        let released = self
            .circuits
            .with_entry_mut(name.to_string(), CircuitRecord::new, CircuitRecord::release_probe);
        if released {
            tracing::debug!(circuit = %name, "Probe dropped before completing, attempt returned");
        }
    }

    /// Close the circuit after a successful call.
    pub fn record_success(&self, name: &str) {
        let transition =
            self.circuits
                .with_entry_mut(name.to_string(), CircuitRecord::new, CircuitRecord::on_success);
        self.observe(name, transition);
    }

    /// Count a failed call.
    pub fn record_failure(&self, name: &str, options: &CircuitBreakerOptions) {
        let now = self.clock.now();
        let transition = self.circuits.with_entry_mut(
            name.to_string(),
            CircuitRecord::new,
            |record| record.on_failure(now, options),
        );
        self.observe(name, transition);
    }

    /// Run `f` behind the circuit named `name`.
    ///
    /// When the circuit is open, `f` is not invoked and the fallback is
    /// resolved. Otherwise `f` runs; `Ok` records a success, while `Err` or a
    /// panic records a failure and resolves the fallback. Errors from `f` are
    /// logged, never returned.
    ///
    /// # Example
    /// ```
    /// use resilience_kit::{CircuitBreakerOptions, CircuitBreakerRegistry, Fallback, MetricsRegistry, SystemClock};
    /// use std::sync::Arc;
    ///
    /// # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
    /// let breakers = CircuitBreakerRegistry::new(Arc::new(SystemClock::new()), MetricsRegistry::new());
    /// let outcome = breakers
    ///     .with_circuit_breaker(
    ///         "geocoder",
    ///         || async { Err::<u32, _>("connection refused") },
    ///         Fallback::value(0),
    ///         &CircuitBreakerOptions::default(),
    ///     )
    ///     .await;
    /// assert_eq!(outcome.result, 0);
    /// assert!(outcome.from_fallback);
    /// # });
    /// ```
    pub async fn with_circuit_breaker<T, E, F, Fut>(
        &self,
        name: &str,
        f: F,
        fallback: Fallback<T>,
        options: &CircuitBreakerOptions,
    ) -> CircuitOutcome<T>
    where
        T: Send + 'static,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let (open, probe) = self.admit(name, options);
        if open {
            self.metrics
                .increment("circuit_breaker_rejected_total", labels([("circuit", name)]));
            return self.resolve_fallback(name, fallback).await;
        }

        let mut guard = probe.then(|| ProbeGuard {
            registry: self,
            name,
            settled: false,
        });

        let started = self.clock.now();
        let result = AssertUnwindSafe(async move { f().await })
            .catch_unwind()
            .await;
        let elapsed = self.clock.now().saturating_duration_since(started);

        if let Some(guard) = guard.as_mut() {
            guard.settled = true;
        }

        let outcome = match result {
            Ok(Ok(value)) => {
                self.record_success(name);
                Ok(value)
            }
            Ok(Err(e)) => {
                tracing::warn!(circuit = %name, error = %e, "Guarded call failed");
                self.record_failure(name, options);
                Err(())
            }
            Err(_) => {
                tracing::error!(circuit = %name, "Guarded call panicked");
                self.record_failure(name, options);
                Err(())
            }
        };

        let label = if outcome.is_ok() { "success" } else { "failure" };
        self.metrics.record_duration(
            "circuit_breaker_call_duration",
            elapsed,
            labels([("circuit", name), ("outcome", label)]),
        );

        match outcome {
            Ok(value) => CircuitOutcome {
                result: value,
                from_fallback: false,
            },
            Err(()) => self.resolve_fallback(name, fallback).await,
        }
    }

    /// Run `f` with the registry's default options.
    pub async fn call<T, E, F, Fut>(&self, name: &str, f: F, fallback: Fallback<T>) -> CircuitOutcome<T>
    where
        T: Send + 'static,
        E: Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let options = self.default_options.clone();
        self.with_circuit_breaker(name, f, fallback, &options).await
    }

    /// Snapshot of one circuit, or `None` if it was never used.
    pub fn get_circuit_status(&self, name: &str) -> Option<CircuitStatus> {
        let now = self.clock.now();
        self.circuits
            .with_entry(&name.to_string(), |record| record.status(name, now))
    }

    /// Snapshots of every known circuit, sorted by name.
    pub fn all_circuit_statuses(&self) -> Vec<CircuitStatus> {
        let now = self.clock.now();
        self.circuits
            .sorted_entries()
            .into_iter()
            .map(|(name, record)| record.status(&name, now))
            .collect()
    }

    /// Names of every known circuit, sorted.
    pub fn circuit_names(&self) -> Vec<String> {
        self.circuits
            .sorted_entries()
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Names of circuits currently stored as open.
    pub fn open_circuits(&self) -> Vec<String> {
        self.all_circuit_statuses()
            .into_iter()
            .filter(|status| status.state == CircuitState::Open)
            .map(|status| status.name)
            .collect()
    }

    /// Forget every circuit.
    pub fn reset_all_circuits(&self) {
        self.circuits.clear();
    }

    async fn resolve_fallback<T: Send + 'static>(
        &self,
        name: &str,
        fallback: Fallback<T>,
    ) -> CircuitOutcome<T> {
        self.metrics
            .increment("circuit_breaker_fallback_total", labels([("circuit", name)]));
        CircuitOutcome {
            result: fallback.resolve().await,
            from_fallback: true,
        }
    }

    fn observe(&self, name: &str, transition: Transition) {
        if !transition.changed() {
            return;
        }

        match transition.to {
            CircuitState::Open => {
                tracing::warn!(circuit = %name, from = %transition.from, "Circuit opened");
                self.metrics
                    .increment("circuit_breaker_opened_total", labels([("circuit", name)]));
            }
            CircuitState::HalfOpen => {
                tracing::info!(circuit = %name, "Circuit half-open, admitting probe");
            }
            CircuitState::Closed => {
                tracing::info!(circuit = %name, from = %transition.from, "Circuit closed");
            }
        }

        let state_value = match transition.to {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        };
        self.metrics
            .record_gauge("circuit_breaker_state", state_value, labels([("circuit", name)]));
    }
}

/// Returns a consumed half-open attempt when the guarded call is dropped
/// before it settles, so a cancelled probe cannot wedge the circuit.
struct ProbeGuard<'a> {
    registry: &'a CircuitBreakerRegistry,
    name: &'a str,
    settled: bool,
}

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.release_probe(self.name);
        }
    }
}
