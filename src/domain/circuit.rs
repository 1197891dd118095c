//! Circuit breaker state machine.
//!
//! Pure transition logic for a single named dependency. The registry in
//! `application::circuit_breaker` owns one `CircuitRecord` per name and feeds
//! it the current instant, which keeps every rule here deterministic.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow to the dependency
    Closed,
    /// Calls short-circuit to the fallback
    Open,
    /// A limited number of probe calls are admitted
    HalfOpen,
}

impl CircuitState {
    /// Label value used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tuning knobs for a circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerOptions {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,
    /// Time after the last failure before an open circuit admits a probe
    pub reset_timeout: Duration,
    /// Probe calls admitted while half-open
    pub half_open_max_attempts: u32,
}

impl Default for CircuitBreakerOptions {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_max_attempts: 1,
        }
    }
}

impl CircuitBreakerOptions {
    /// Options with the given failure threshold and defaults elsewhere.
    pub fn with_threshold(failure_threshold: u32) -> Self {
        Self {
            failure_threshold,
            ..Self::default()
        }
    }

    /// Set the reset timeout.
    pub fn reset_timeout(mut self, reset_timeout: Duration) -> Self {
        self.reset_timeout = reset_timeout;
        self
    }

    /// Set the number of half-open probes.
    pub fn half_open_max_attempts(mut self, attempts: u32) -> Self {
        self.half_open_max_attempts = attempts;
        self
    }
}

/// Result of feeding an event into a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// State before the event
    pub from: CircuitState,
    /// State after the event
    pub to: CircuitState,
}

impl Transition {
    /// Whether the event changed the state.
    pub fn changed(&self) -> bool {
        self.from != self.to
    }
}

/// Per-dependency circuit state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitRecord {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    half_open_attempts: u32,
}

impl Default for CircuitRecord {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitRecord {
    /// A fresh, closed circuit.
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            half_open_attempts: 0,
        }
    }

    /// Current state, without applying any time-based transition.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Consecutive failures since the last success.
    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// When the last failure was recorded.
    pub fn last_failure_at(&self) -> Option<Instant> {
        self.last_failure_at
    }

    /// Probes admitted in the current half-open window.
    pub fn half_open_attempts(&self) -> u32 {
        self.half_open_attempts
    }

    /// Decide whether a call must be short-circuited.
    ///
    /// An open circuit whose cooldown has elapsed moves to half-open here,
    /// and a half-open circuit admits up to `half_open_max_attempts` probes
    /// (at least one). Rejected probes do not consume an attempt.
    pub fn poll_open(&mut self, now: Instant, options: &CircuitBreakerOptions) -> (bool, Transition) {
        let from = self.state;

        if self.state == CircuitState::Open {
            let elapsed = self
                .last_failure_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or(Duration::MAX);

            if elapsed < options.reset_timeout {
                return (true, Transition { from, to: self.state });
            }

            self.state = CircuitState::HalfOpen;
            self.half_open_attempts = 0;
        }

        let open = match self.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => {
                if self.half_open_attempts < options.half_open_max_attempts.max(1) {
                    self.half_open_attempts += 1;
                    false
                } else {
                    true
                }
            }
            CircuitState::Open => true,
        };

        (open, Transition { from, to: self.state })
    }

    /// Give back a half-open probe that ended without a result.
    ///
    /// Returns `false` when there was nothing to give back.
    pub fn release_probe(&mut self) -> bool {
        if self.state == CircuitState::HalfOpen && self.half_open_attempts > 0 {
            self.half_open_attempts -= 1;
            true
        } else {
            false
        }
    }

    /// Reset to closed after a successful call.
    pub fn on_success(&mut self) -> Transition {
        let from = self.state;
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.half_open_attempts = 0;
        Transition { from, to: self.state }
    }

    /// Count a failed call and apply the opening rules.
    pub fn on_failure(&mut self, now: Instant, options: &CircuitBreakerOptions) -> Transition {
        let from = self.state;
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);

        match self.state {
            CircuitState::HalfOpen => {
                self.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                if self.failure_count >= options.failure_threshold {
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }

        Transition { from, to: self.state }
    }

    /// Snapshot for introspection.
    pub fn status(&self, name: &str, now: Instant) -> CircuitStatus {
        CircuitStatus {
            name: name.to_string(),
            state: self.state,
            failures: self.failure_count,
            last_failure_ago_ms: self
                .last_failure_at
                .map(|at| now.saturating_duration_since(at).as_millis() as u64),
            half_open_attempts: self.half_open_attempts,
        }
    }
}

/// Read-only view of a circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitStatus {
    /// Dependency name
    pub name: String,
    /// Stored state
    pub state: CircuitState,
    /// Consecutive failures
    pub failures: u32,
    /// Milliseconds since the last failure, if any
    pub last_failure_ago_ms: Option<u64>,
    /// Probes admitted in the current half-open window
    pub half_open_attempts: u32,
}
