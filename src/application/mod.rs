//! Application layer - orchestration of domain logic.
//!
//! This layer owns the runtime state and talks to the outside world through
//! ports:
//! - Circuit breaker registry (per-dependency state machines)
//! - Rate limiter (remote counters with an in-process fallback)
//! - Metrics registry (counters, gauges, timings and their exporters)
//! - Cache client and the chart cache built on it
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod cache;
pub mod chart_cache;
pub mod circuit_breaker;
pub mod local_windows;
pub mod metrics;
pub mod ports;
pub mod rate_limiter;
