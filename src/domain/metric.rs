//! Metric identities and timing summaries.

use std::collections::BTreeMap;
use std::fmt;

/// Capacity of a timing's sample buffer.
pub const MAX_SAMPLES: usize = 1000;

/// Metric labels. A `BTreeMap` keeps them sorted, so two label sets with the
/// same pairs always produce the same key.
pub type Labels = BTreeMap<String, String>;

/// Build a label set from string pairs.
pub fn labels<K, V, I>(pairs: I) -> Labels
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Identity of a metric series: name plus sorted labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    name: String,
    labels: Labels,
}

impl MetricKey {
    pub fn new(name: impl Into<String>, labels: Labels) -> Self {
        Self {
            name: name.into(),
            labels,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Labels rendered as `k1="v1",k2="v2"` in key order.
    pub fn label_string(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            f.write_str(&self.name)
        } else {
            write!(f, "{}{{{}}}", self.name, self.label_string())
        }
    }
}

/// Nearest-rank percentile of an ascending slice; 0 for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let index = rank.clamp(0, n as i64 - 1) as usize;
    sorted[index]
}

/// Latency summary for one series.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    count: u64,
    sum: f64,
    max: f64,
    samples: Vec<f64>,
}

impl Default for Timing {
    fn default() -> Self {
        Self::new()
    }
}

impl Timing {
    pub fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            max: 0.0,
            samples: Vec::new(),
        }
    }

    /// Add one observation in milliseconds.
    ///
    /// Once the buffer holds `MAX_SAMPLES` entries, the n-th observation
    /// (0-based) overwrites slot `n % MAX_SAMPLES`.
    pub fn record(&mut self, ms: f64) {
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push(ms);
        } else {
            let slot = (self.count % MAX_SAMPLES as u64) as usize;
            self.samples[slot] = ms;
        }
        if self.count == 0 || ms > self.max {
            self.max = ms;
        }
        self.count += 1;
        self.sum += ms;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }

    pub fn samples(&self) -> &[f64] {
        &self.samples
    }

    /// Computed summary over the retained samples.
    pub fn summary(&self) -> TimingSummary {
        let mut sorted = self.samples.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        TimingSummary {
            count: self.count,
            sum: self.sum,
            avg: self.avg(),
            max: self.max,
            p50: percentile(&sorted, 50.0),
            p95: percentile(&sorted, 95.0),
            p99: percentile(&sorted, 99.0),
        }
    }
}

/// Numbers derived from a `Timing`, all in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingSummary {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_label_order() {
        let a = MetricKey::new("req", labels([("route", "/a"), ("method", "GET")]));
        let b = MetricKey::new("req", labels([("method", "GET"), ("route", "/a")]));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "req{method=\"GET\",route=\"/a\"}");
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted = [100.0, 200.0, 300.0, 400.0, 500.0];
        assert_eq!(percentile(&sorted, 50.0), 300.0);
        assert_eq!(percentile(&sorted, 30.0), 200.0);
        assert_eq!(percentile(&sorted, 95.0), 500.0);
        assert_eq!(percentile(&sorted, 99.0), 500.0);
        assert_eq!(percentile(&sorted, 0.0), 100.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_timing_summary() {
        let mut timing = Timing::new();
        for ms in [300.0, 100.0, 500.0, 200.0, 400.0] {
            timing.record(ms);
        }
        let summary = timing.summary();
        assert_eq!(summary.count, 5);
        assert_eq!(summary.sum, 1500.0);
        assert_eq!(summary.max, 500.0);
        assert_eq!(summary.avg, 300.0);
        assert_eq!(summary.p50, 300.0);
        assert_eq!(summary.p95, 500.0);
    }

    #[test]
    fn test_circular_overwrite() {
        let mut timing = Timing::new();
        for i in 0..MAX_SAMPLES {
            timing.record(i as f64);
        }
        assert_eq!(timing.samples().len(), MAX_SAMPLES);

        timing.record(-1.0);
        timing.record(-2.0);
        assert_eq!(timing.samples().len(), MAX_SAMPLES);
        assert_eq!(timing.samples()[0], -1.0);
        assert_eq!(timing.samples()[1], -2.0);
        assert_eq!(timing.samples()[2], 2.0);
        assert_eq!(timing.count(), MAX_SAMPLES as u64 + 2);
        assert_eq!(timing.max(), (MAX_SAMPLES - 1) as f64);
    }
}
