//! Integrity-checked cache for computed charts.
//!
//! Lookup keys are coarse, so two nearby inputs can land on the same entry.
//! Every entry carries the fine-grained integrity key of the input that
//! produced it, and a read whose own integrity key differs is a miss.

use crate::application::cache::{CacheClient, CacheResult, CacheWriteResult};
use crate::application::metrics::MetricsRegistry;
use crate::application::ports::Clock;
use crate::domain::chart::ChartInput;
use crate::domain::metric::Labels;
use crate::domain::rate_limit::unix_millis;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Default lifetime of a cached chart.
pub const DEFAULT_CHART_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Stored form of a chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartEnvelope<C> {
    pub integrity_key: String,
    pub chart: C,
    /// Unix milliseconds at write time
    pub cached_at: u64,
}

/// Chart cache on top of a `CacheClient`.
#[derive(Debug, Clone)]
pub struct ChartCache {
    cache: CacheClient,
    clock: Arc<dyn Clock>,
    metrics: MetricsRegistry,
    ttl: Duration,
}

impl ChartCache {
    pub fn new(cache: CacheClient, clock: Arc<dyn Clock>, metrics: MetricsRegistry) -> Self {
        Self {
            cache,
            clock,
            metrics,
            ttl: DEFAULT_CHART_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Read the chart for `input`.
    pub async fn get<C: DeserializeOwned>(&self, input: &ChartInput) -> CacheResult<C> {
        let key = input.lookup_key();

        match self.cache.get_result::<ChartEnvelope<C>>(&key).await {
            CacheResult::Hit(envelope) => {
                let expected = input.integrity_key();
                if envelope.integrity_key == expected {
                    CacheResult::Hit(envelope.chart)
                } else {
                    tracing::warn!(
                        key = %key,
                        stored = %envelope.integrity_key,
                        expected = %expected,
                        "Chart cache integrity mismatch"
                    );
                    self.metrics
                        .increment("chart_cache_integrity_mismatch_total", Labels::new());
                    CacheResult::Miss
                }
            }
            CacheResult::Miss => CacheResult::Miss,
            CacheResult::Error(e) => CacheResult::Error(e),
        }
    }

    /// Store `chart` as the result for `input`.
    pub async fn set<C: Serialize>(&self, input: &ChartInput, chart: &C) -> CacheWriteResult {
        let envelope = self.envelope(input, chart);
        self.cache
            .set_result(&input.lookup_key(), &envelope, self.ttl)
            .await
    }

    /// Return the cached chart for `input`, or compute it.
    ///
    /// Same contract as `CacheClient::cache_or_calculate`: the write-back is
    /// detached and errors from `compute` propagate.
    pub async fn get_or_compute<C, E, F, Fut>(&self, input: &ChartInput, compute: F) -> Result<C, E>
    where
        C: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, E>>,
    {
        if let CacheResult::Hit(chart) = self.get(input).await {
            return Ok(chart);
        }

        let chart = compute().await?;

        match serde_json::to_string(&self.envelope(input, &chart)) {
            Ok(payload) => {
                self.cache
                    .spawn_write_back(input.lookup_key(), payload, self.ttl);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Computed chart is not cacheable");
            }
        }

        Ok(chart)
    }

    fn envelope<'a, C>(&self, input: &ChartInput, chart: &'a C) -> ChartEnvelope<&'a C> {
        ChartEnvelope {
            integrity_key: input.integrity_key(),
            chart,
            cached_at: unix_millis(self.clock.system_time()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::{MockClock, MockStore};
    use std::time::{Instant, UNIX_EPOCH};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Chart {
        ascendant: String,
        houses: Vec<u8>,
    }

    fn chart() -> Chart {
        Chart {
            ascendant: "leo".to_string(),
            houses: vec![1, 2, 3],
        }
    }

    fn setup() -> (ChartCache, MockStore, MetricsRegistry) {
        let clock = MockClock::with_system_time(
            Instant::now(),
            UNIX_EPOCH + Duration::from_millis(1_700_000_000_000),
        );
        let store = MockStore::new(Arc::new(clock.clone()));
        let metrics = MetricsRegistry::new();
        let cache = CacheClient::new(Some(Arc::new(store.clone())), metrics.clone());
        let charts = ChartCache::new(cache, Arc::new(clock), metrics.clone());
        (charts, store, metrics)
    }

    #[tokio::test]
    async fn test_round_trip_stores_envelope() {
        let (charts, store, _) = setup();
        let input = ChartInput::new("1990-05-15", "14:30", 37.5665, 126.978);

        charts.set(&input, &chart()).await.unwrap();

        let raw = store.raw(&input.lookup_key()).unwrap();
        let stored: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(stored["integrity_key"], "1990-05-15|14:30|37.5665|126.9780");
        assert_eq!(stored["cached_at"], 1_700_000_000_000u64);

        match charts.get::<Chart>(&input).await {
            CacheResult::Hit(value) => assert_eq!(value, chart()),
            other => panic!("expected hit, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_nearby_input_is_a_miss() {
        let (charts, _, metrics) = setup();
        let stored = ChartInput::new("1990-05-15", "14:30", 37.5665, 126.9780);
        let nearby = ChartInput::new("1990-05-15", "14:30", 37.5712, 126.9790);
        assert_eq!(stored.lookup_key(), nearby.lookup_key());

        charts.set(&stored, &chart()).await.unwrap();

        assert!(charts.get::<Chart>(&nearby).await.is_miss());
        assert_eq!(
            metrics.counter_value("chart_cache_integrity_mismatch_total", &Labels::new()),
            Some(1.0)
        );
    }

    #[tokio::test]
    async fn test_legacy_payload_is_a_miss() {
        let (charts, store, _) = setup();
        let input = ChartInput::new("1990-05-15", "14:30", 37.5665, 126.978);
        store.insert_raw(&input.lookup_key(), "{\"ascendant\":\"leo\",\"houses\":[1]}");

        assert!(charts.get::<Chart>(&input).await.is_miss());
    }

    #[tokio::test]
    async fn test_get_or_compute() {
        let (charts, store, _) = setup();
        let input = ChartInput::new("2001-01-01", "00:05", -33.8688, 151.2093);

        let computed: Result<Chart, String> = charts.get_or_compute(&input, || async { Ok(chart()) }).await;
        assert_eq!(computed.unwrap(), chart());

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(store.raw(&input.lookup_key()).is_some());

        let cached: Result<Chart, String> = charts
            .get_or_compute(&input, || async { Err("recomputed".to_string()) })
            .await;
        assert_eq!(cached.unwrap(), chart());
    }
}
