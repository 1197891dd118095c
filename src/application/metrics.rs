//! In-process metrics registry.
//!
//! Counters, gauges and timing summaries keyed by name plus sorted labels,
//! exported as Prometheus text or an OTLP-shaped JSON document. Each process
//! keeps its own registry; exporters are how the numbers leave it.

use crate::application::ports::Storage;
use crate::domain::metric::{Labels, MetricKey, Timing, TimingSummary};
use crate::infrastructure::storage::ShardedStorage;
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;

/// Service name reported when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "resilience-kit";

/// Metrics registry shared by every component of a service instance.
///
/// Cloning is cheap and clones share state.
#[derive(Debug, Clone)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    service_name: String,
    counters: ShardedStorage<MetricKey, f64>,
    gauges: ShardedStorage<MetricKey, f64>,
    timings: ShardedStorage<MetricKey, Timing>,
}

impl MetricsRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::with_service_name(DEFAULT_SERVICE_NAME)
    }

    /// Create an empty registry reporting under `service_name` in OTLP output.
    pub fn with_service_name(service_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                service_name: service_name.into(),
                counters: ShardedStorage::new(),
                gauges: ShardedStorage::new(),
                timings: ShardedStorage::new(),
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    /// Add `value` to a counter.
    pub fn record_counter(&self, name: &str, value: f64, labels: Labels) {
        self.inner
            .counters
            .with_entry_mut(MetricKey::new(name, labels), || 0.0, |v| *v += value);
    }

    /// Add one to a counter.
    pub fn increment(&self, name: &str, labels: Labels) {
        self.record_counter(name, 1.0, labels);
    }

    /// Set a gauge.
    pub fn record_gauge(&self, name: &str, value: f64, labels: Labels) {
        self.inner
            .gauges
            .with_entry_mut(MetricKey::new(name, labels), || value, |v| *v = value);
    }

    /// Record a latency observation in milliseconds.
    pub fn record_timing(&self, name: &str, ms: f64, labels: Labels) {
        self.inner
            .timings
            .with_entry_mut(MetricKey::new(name, labels), Timing::new, |t| t.record(ms));
    }

    /// Record a latency observation from a `Duration`.
    pub fn record_duration(&self, name: &str, elapsed: Duration, labels: Labels) {
        self.record_timing(name, elapsed.as_secs_f64() * 1000.0, labels);
    }

    /// Current value of a counter series.
    pub fn counter_value(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.inner
            .counters
            .with_entry(&MetricKey::new(name, labels.clone()), |v| *v)
    }

    /// Current value of a gauge series.
    pub fn gauge_value(&self, name: &str, labels: &Labels) -> Option<f64> {
        self.inner
            .gauges
            .with_entry(&MetricKey::new(name, labels.clone()), |v| *v)
    }

    /// Summary of a timing series.
    pub fn timing_summary(&self, name: &str, labels: &Labels) -> Option<TimingSummary> {
        self.inner
            .timings
            .with_entry(&MetricKey::new(name, labels.clone()), Timing::summary)
    }

    /// Plain snapshot of every series, sorted by key.
    pub fn get_metrics_snapshot(&self) -> MetricsSnapshot {
        let values = |storage: &ShardedStorage<MetricKey, f64>| -> Vec<SeriesValue> {
            storage
                .sorted_entries()
                .into_iter()
                .map(|(key, value)| SeriesValue {
                    name: key.name().to_string(),
                    labels: key.labels().clone(),
                    value,
                })
                .collect()
        };

        let timings = self
            .inner
            .timings
            .sorted_entries()
            .into_iter()
            .map(|(key, timing)| TimingSeries::new(&key, timing.summary()))
            .collect();

        MetricsSnapshot {
            counters: values(&self.inner.counters),
            gauges: values(&self.inner.gauges),
            timings,
        }
    }

    /// Render every series in Prometheus text exposition format.
    ///
    /// Timings become `<name>_seconds` summaries with `_count`, `_sum`,
    /// `_avg`, `_max` and 0.5/0.95/0.99 quantiles, converted to seconds.
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.get_metrics_snapshot();
        let mut out = String::new();

        write_values(&mut out, "counter", &snapshot.counters);
        write_values(&mut out, "gauge", &snapshot.gauges);

        let mut last_name: Option<String> = None;
        for timing in &snapshot.timings {
            let base = format!("{}_seconds", sanitize_name(&timing.name));
            if last_name.as_deref() != Some(base.as_str()) {
                let _ = writeln!(out, "# TYPE {} summary", base);
                last_name = Some(base.clone());
            }

            let labels = render_labels(&timing.labels, None);
            let _ = writeln!(out, "{}_count{} {}", base, labels, timing.count);
            let _ = writeln!(out, "{}_sum{} {}", base, labels, prom_value(ms_to_secs(timing.sum)));
            let _ = writeln!(out, "{}_avg{} {}", base, labels, prom_value(ms_to_secs(timing.avg)));
            let _ = writeln!(out, "{}_max{} {}", base, labels, prom_value(ms_to_secs(timing.max)));
            for (quantile, value) in [("0.5", timing.p50), ("0.95", timing.p95), ("0.99", timing.p99)] {
                let labels = render_labels(&timing.labels, Some(quantile));
                let _ = writeln!(out, "{}{} {}", base, labels, prom_value(ms_to_secs(value)));
            }
        }

        out
    }

    /// Render every series as a minimal OTLP-shaped JSON document.
    ///
    /// Metrics live at `resourceMetrics[0].scopeMetrics[0].metrics[]`.
    pub fn to_otlp(&self) -> Value {
        let snapshot = self.get_metrics_snapshot();

        let scalar = |kind: &str, series: &SeriesValue| {
            json!({
                "name": series.name,
                "type": kind,
                "value": series.value,
                "labels": series.labels,
            })
        };

        let mut metrics: Vec<Value> = Vec::new();
        metrics.extend(snapshot.counters.iter().map(|s| scalar("counter", s)));
        metrics.extend(snapshot.gauges.iter().map(|s| scalar("gauge", s)));
        metrics.extend(snapshot.timings.iter().map(|t| {
            json!({
                "name": t.name,
                "type": "summary",
                "count": t.count,
                "sum_ms": t.sum,
                "max_ms": t.max,
                "p50_ms": t.p50,
                "p95_ms": t.p95,
                "p99_ms": t.p99,
                "labels": t.labels,
            })
        }));

        json!({
            "resourceMetrics": [{
                "resource": {
                    "attributes": [{
                        "key": "service.name",
                        "value": { "stringValue": self.inner.service_name },
                    }],
                },
                "scopeMetrics": [{
                    "scope": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "metrics": metrics,
                }],
            }],
        })
    }

    /// Clear counters, gauges and timings.
    pub fn reset_metrics(&self) {
        self.inner.counters.clear();
        self.inner.gauges.clear();
        self.inner.timings.clear();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time copy of every series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<SeriesValue>,
    pub gauges: Vec<SeriesValue>,
    pub timings: Vec<TimingSeries>,
}

impl MetricsSnapshot {
    /// Find a counter by name and labels.
    pub fn counter(&self, name: &str, labels: &Labels) -> Option<f64> {
        find(&self.counters, name, labels)
    }

    /// Find a gauge by name and labels.
    pub fn gauge(&self, name: &str, labels: &Labels) -> Option<f64> {
        find(&self.gauges, name, labels)
    }

    /// Find a timing by name and labels.
    pub fn timing(&self, name: &str, labels: &Labels) -> Option<&TimingSeries> {
        self.timings
            .iter()
            .find(|t| t.name == name && &t.labels == labels)
    }
}

fn find(series: &[SeriesValue], name: &str, labels: &Labels) -> Option<f64> {
    series
        .iter()
        .find(|s| s.name == name && &s.labels == labels)
        .map(|s| s.value)
}

/// Counter or gauge value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesValue {
    pub name: String,
    pub labels: Labels,
    pub value: f64,
}

/// Timing summary in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimingSeries {
    pub name: String,
    pub labels: Labels,
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl TimingSeries {
    fn new(key: &MetricKey, summary: TimingSummary) -> Self {
        Self {
            name: key.name().to_string(),
            labels: key.labels().clone(),
            count: summary.count,
            sum: summary.sum,
            avg: summary.avg,
            max: summary.max,
            p50: summary.p50,
            p95: summary.p95,
            p99: summary.p99,
        }
    }
}

fn write_values(out: &mut String, kind: &str, series: &[SeriesValue]) {
    let mut last_name: Option<String> = None;
    for s in series {
        let name = sanitize_name(&s.name);
        if last_name.as_deref() != Some(name.as_str()) {
            let _ = writeln!(out, "# TYPE {} {}", name, kind);
            last_name = Some(name.clone());
        }
        let _ = writeln!(out, "{}{} {}", name, render_labels(&s.labels, None), prom_value(s.value));
    }
}

fn ms_to_secs(ms: f64) -> f64 {
    ms / 1000.0
}

/// Sample value as the exposition format spells it (`+Inf`, `-Inf`, `NaN`).
fn prom_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}

/// Replace characters outside `[a-zA-Z0-9_:]`; a leading digit gets a `_` prefix.
fn sanitize_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn render_labels(labels: &Labels, quantile: Option<&str>) -> String {
    let mut parts: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", sanitize_name(k), escape_label_value(v)))
        .collect();
    if let Some(q) = quantile {
        parts.push(format!("quantile=\"{}\"", q));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("{{{}}}", parts.join(","))
    }
}
