//! Fixed-window rate limiting types.
//!
//! Windows are measured in wall-clock milliseconds since the unix epoch so
//! that a reset time computed from a remote TTL and one computed locally are
//! directly comparable and can be sent to clients as-is.

use serde::Serialize;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_POLICY: &str = "X-RateLimit-Policy";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Milliseconds since the unix epoch, saturating at zero for pre-epoch times.
pub fn unix_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Deployment environment, which decides the no-backend behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    /// Fail closed without a backend
    Production,
    /// Fail open without a backend
    #[default]
    Development,
}

impl Environment {
    /// Parse an environment name. `production` and `prod` are production,
    /// anything else is development.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Limit applied to one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitOptions {
    /// Requests admitted per window
    pub limit: u64,
    /// Window length
    pub window: Duration,
}

impl RateLimitOptions {
    pub fn new(limit: u64, window: Duration) -> Self {
        Self { limit, window }
    }

    /// Convenience for the common `limit per N seconds` form.
    pub fn per_seconds(limit: u64, window_seconds: u64) -> Self {
        Self::new(limit, Duration::from_secs(window_seconds))
    }

    pub(crate) fn window_millis(&self) -> u64 {
        (self.window.as_millis() as u64).max(1)
    }
}

impl Default for RateLimitOptions {
    fn default() -> Self {
        Self::per_seconds(60, 60)
    }
}

/// Degraded-mode marker sent as `X-RateLimit-Policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RateLimitPolicy {
    /// Production without a backend: every request is denied
    #[serde(rename = "enforced-no-backend")]
    EnforcedNoBackend,
    /// Development without a backend: every request is allowed
    #[serde(rename = "disabled-dev")]
    DisabledDev,
    /// Backend failed, counted in process memory
    #[serde(rename = "in-memory-fallback")]
    InMemoryFallback,
}

impl RateLimitPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitPolicy::EnforcedNoBackend => "enforced-no-backend",
            RateLimitPolicy::DisabledDev => "disabled-dev",
            RateLimitPolicy::InMemoryFallback => "in-memory-fallback",
        }
    }
}

impl fmt::Display for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter state returned by a remote increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Requests counted in the current window, including this one
    pub count: u64,
    /// Time left until the window expires
    pub ttl: Duration,
}

/// Locally tracked window for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitWindow {
    /// Requests counted so far
    pub count: u64,
    /// Unix milliseconds at which the window ends
    pub reset_at: u64,
}

impl RateLimitWindow {
    /// An empty window starting at `now_ms`.
    pub fn open(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            reset_at: now_ms.saturating_add(window_ms),
        }
    }

    /// Whether the window has ended.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.reset_at
    }

    /// Count one request, starting a new window if this one has ended.
    pub fn increment(&mut self, now_ms: u64, window_ms: u64) -> u64 {
        if self.is_expired(now_ms) {
            *self = Self::open(now_ms, window_ms);
        }
        self.count = self.count.saturating_add(1);
        self.count
    }
}

/// Ordered response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitHeaders(Vec<(&'static str, String)>);

impl RateLimitHeaders {
    fn push(&mut self, name: &'static str, value: impl ToString) {
        self.0.push((name, value.to_string()));
    }

    /// Look up a header value by case-insensitive name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.0.iter().map(|(n, v)| (*n, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Unix milliseconds at which the current window ends
    pub reset: u64,
    /// Whole seconds until `reset`, present only when denied
    pub retry_after: Option<u64>,
    /// Degraded-mode marker, absent on the healthy path
    pub policy: Option<RateLimitPolicy>,
    pub headers: RateLimitHeaders,
}

impl RateLimitResult {
    /// Decision from a counted request.
    pub fn from_count(
        count: u64,
        limit: u64,
        reset: u64,
        now_ms: u64,
        policy: Option<RateLimitPolicy>,
    ) -> Self {
        let allowed = count <= limit;
        Self::build(allowed, limit, limit.saturating_sub(count), reset, now_ms, policy)
    }

    /// Deny without counting.
    pub fn deny_all(limit: u64, reset: u64, now_ms: u64, policy: RateLimitPolicy) -> Self {
        Self::build(false, limit, 0, reset, now_ms, Some(policy))
    }

    /// Allow without counting.
    pub fn allow_all(limit: u64, reset: u64, now_ms: u64, policy: RateLimitPolicy) -> Self {
        Self::build(true, limit, limit, reset, now_ms, Some(policy))
    }

    fn build(
        allowed: bool,
        limit: u64,
        remaining: u64,
        reset: u64,
        now_ms: u64,
        policy: Option<RateLimitPolicy>,
    ) -> Self {
        let retry_after = (!allowed).then(|| seconds_until(reset, now_ms));

        let mut headers = RateLimitHeaders::default();
        headers.push(HEADER_LIMIT, limit);
        headers.push(HEADER_REMAINING, remaining);
        headers.push(HEADER_RESET, reset.div_ceil(1000));
        if let Some(policy) = policy {
            headers.push(HEADER_POLICY, policy);
        }
        if let Some(secs) = retry_after {
            headers.push(HEADER_RETRY_AFTER, secs);
        }

        Self {
            allowed,
            limit,
            remaining,
            reset,
            retry_after,
            policy,
            headers,
        }
    }
}

/// Ceil seconds from `now_ms` to `reset_ms`, never below one.
fn seconds_until(reset_ms: u64, now_ms: u64) -> u64 {
    reset_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
}
