//! Domain layer - pure types and algorithms with no I/O.
//!
//! - Circuit breaker state machine
//! - Fixed-window counting and rate limit decisions
//! - Metric identities, timing buffers and nearest-rank percentiles
//! - Versioned cache keys and chart integrity keys
//!
//! Everything here takes time as an argument, so it is testable without a clock.

pub mod cache_key;
pub mod chart;
pub mod circuit;
pub mod metric;
pub mod rate_limit;
