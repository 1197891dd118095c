//! Integration tests for the cache client and the chart cache.

use resilience_kit::infrastructure::mocks::{MockClock, MockStore};
use resilience_kit::{
    make_cache_key, CacheClient, CacheError, CacheResult, ChartCache, ChartInput, KvStore, Labels,
    MetricsRegistry, StoreError,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Compatibility {
    score: u8,
    summary: String,
}

fn compatibility() -> Compatibility {
    Compatibility {
        score: 87,
        summary: "harmonious".to_string(),
    }
}

fn setup() -> (CacheClient, MockStore, MockClock, MetricsRegistry) {
    let clock = MockClock::default();
    let store = MockStore::new(Arc::new(clock.clone()));
    let metrics = MetricsRegistry::new();
    let cache = CacheClient::new(Some(Arc::new(store.clone()) as Arc<dyn KvStore>), metrics.clone());
    (cache, store, clock, metrics)
}

#[test]
fn test_key_is_order_independent() {
    assert_eq!(
        make_cache_key("x", [("a", 1), ("b", 2)], 1),
        make_cache_key("x", [("b", 2), ("a", 1)], 1)
    );
}

#[tokio::test]
async fn test_version_isolation() {
    let (cache, _, _, _) = setup();
    let params = [("a", "1"), ("b", "2")];

    assert!(cache
        .set(&make_cache_key("compat", params, 1), &compatibility(), Duration::from_secs(60))
        .await);

    assert!(cache
        .get_result::<Compatibility>(&make_cache_key("compat", params, 2))
        .await
        .is_miss());
    assert!(cache
        .get_result::<Compatibility>(&make_cache_key("compat", params, 1))
        .await
        .is_hit());
}

#[tokio::test]
async fn test_error_is_not_a_miss() {
    let (cache, store, _, metrics) = setup();
    store.set_failing(true);

    let read = cache.get_result::<Compatibility>("k").await;
    assert!(read.is_error());

    let write = cache.set_result("k", &compatibility(), Duration::from_secs(60)).await;
    assert!(matches!(write, Err(CacheError::Store(StoreError::Connection(_)))));

    assert_eq!(cache.get::<Compatibility>("k").await, None);
    assert!(!cache.del("k").await);

    let snapshot = metrics.get_metrics_snapshot();
    let errors: f64 = snapshot
        .counters
        .iter()
        .filter(|c| c.name == "cache_error_total")
        .map(|c| c.value)
        .sum();
    assert_eq!(errors, 4.0);
}

#[tokio::test]
async fn test_cache_or_calculate_runs_once() {
    let (cache, _, _, metrics) = setup();
    let runs = AtomicUsize::new(0);

    for _ in 0..3 {
        let value: Result<Compatibility, String> = cache
            .cache_or_calculate(
                "compat:v1:a:1|b:2",
                || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(compatibility())
                },
                Duration::from_secs(300),
            )
            .await;
        assert_eq!(value.unwrap(), compatibility());
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(metrics.counter_value("cache_hit_total", &Labels::new()), Some(2.0));
    assert_eq!(metrics.counter_value("cache_miss_total", &Labels::new()), Some(1.0));
}

#[tokio::test]
async fn test_cache_or_calculate_survives_store_outage() {
    let (cache, store, _, _) = setup();
    store.set_failing(true);

    let value: Result<Compatibility, String> = cache
        .cache_or_calculate("k", || async { Ok(compatibility()) }, Duration::from_secs(60))
        .await;

    assert_eq!(value.unwrap(), compatibility());
}

#[tokio::test]
async fn test_chart_cache_round_trip() {
    let (cache, store, clock, metrics) = setup();
    let charts = ChartCache::new(cache, Arc::new(clock), metrics);
    let input = ChartInput::new("1988-11-02", "06:45", 35.1796, 129.0756);

    charts.set(&input, &compatibility()).await.unwrap();
    assert!(store.raw("chart:v1:date:1988-11-02|lat:35.18|lng:129.08|time:06:45").is_some());

    match charts.get::<Compatibility>(&input).await {
        CacheResult::Hit(value) => assert_eq!(value, compatibility()),
        other => panic!("expected hit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_chart_cache_rejects_neighbour() {
    let (cache, _, clock, metrics) = setup();
    let charts = ChartCache::new(cache, Arc::new(clock), metrics.clone());
    let original = ChartInput::new("1988-11-02", "06:45", 35.1796, 129.0756);
    let neighbour = ChartInput::new("1988-11-02", "06:45", 35.1804, 129.0751);

    charts.set(&original, &compatibility()).await.unwrap();

    let computed: Result<Compatibility, String> = charts
        .get_or_compute(&neighbour, || async {
            Ok(Compatibility {
                score: 12,
                summary: "tense".to_string(),
            })
        })
        .await;
    assert_eq!(computed.unwrap().score, 12);
    assert_eq!(
        metrics.counter_value("chart_cache_integrity_mismatch_total", &Labels::new()),
        Some(1.0)
    );
}
