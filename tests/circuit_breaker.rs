//! Integration tests for the circuit breaker registry.

use resilience_kit::infrastructure::mocks::MockClock;
use resilience_kit::{
    labels, CircuitBreakerOptions, CircuitBreakerRegistry, CircuitState, Fallback, MetricsRegistry,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup() -> (CircuitBreakerRegistry, MockClock, MetricsRegistry) {
    let clock = MockClock::new(Instant::now());
    let metrics = MetricsRegistry::new();
    let breakers = CircuitBreakerRegistry::new(Arc::new(clock.clone()), metrics.clone());
    (breakers, clock, metrics)
}

#[test]
fn test_threshold_three() {
    let (breakers, _, _) = setup();
    let options = CircuitBreakerOptions::with_threshold(3);

    breakers.record_failure("geocoder", &options);
    assert!(!breakers.is_circuit_open("geocoder", &options));
    breakers.record_failure("geocoder", &options);
    assert!(!breakers.is_circuit_open("geocoder", &options));
    breakers.record_failure("geocoder", &options);
    assert!(breakers.is_circuit_open("geocoder", &options));
}

#[test]
fn test_success_resets_from_every_state() {
    let (breakers, clock, _) = setup();
    let options = CircuitBreakerOptions::with_threshold(1).reset_timeout(Duration::from_secs(1));

    // closed
    breakers.record_failure("a", &CircuitBreakerOptions::with_threshold(5));
    breakers.record_success("a");
    assert_eq!(breakers.get_circuit_status("a").unwrap().failures, 0);

    // open
    breakers.record_failure("b", &options);
    breakers.record_success("b");
    let status = breakers.get_circuit_status("b").unwrap();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.failures, 0);

    // half-open
    breakers.record_failure("c", &options);
    clock.advance(Duration::from_secs(1));
    assert!(!breakers.is_circuit_open("c", &options));
    assert_eq!(
        breakers.get_circuit_status("c").unwrap().state,
        CircuitState::HalfOpen
    );
    breakers.record_success("c");
    let status = breakers.get_circuit_status("c").unwrap();
    assert_eq!(status.state, CircuitState::Closed);
    assert_eq!(status.half_open_attempts, 0);
}

#[test]
fn test_half_open_admits_limited_probes() {
    let (breakers, clock, _) = setup();
    let options = CircuitBreakerOptions::with_threshold(1)
        .reset_timeout(Duration::from_millis(100))
        .half_open_max_attempts(2);

    breakers.record_failure("svc", &options);
    clock.advance(Duration::from_millis(100));

    assert!(!breakers.is_circuit_open("svc", &options));
    assert!(!breakers.is_circuit_open("svc", &options));
    assert!(breakers.is_circuit_open("svc", &options));
    assert_eq!(breakers.get_circuit_status("svc").unwrap().half_open_attempts, 2);

    breakers.record_failure("svc", &options);
    assert_eq!(
        breakers.get_circuit_status("svc").unwrap().state,
        CircuitState::Open
    );
}

#[tokio::test]
async fn test_svc_a_scenario() {
    let (breakers, clock, metrics) = setup();
    let options = CircuitBreakerOptions::with_threshold(1).reset_timeout(Duration::from_secs(30));
    let invocations = AtomicUsize::new(0);

    let failed = breakers
        .with_circuit_breaker(
            "svcA",
            || async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Err::<&str, _>("upstream 503")
            },
            Fallback::value("fallback"),
            &options,
        )
        .await;
    assert_eq!(failed.result, "fallback");
    assert!(failed.from_fallback);
    assert_eq!(breakers.open_circuits(), vec!["svcA".to_string()]);

    let skipped = breakers
        .with_circuit_breaker(
            "svcA",
            || async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("live")
            },
            Fallback::from_fn(|| "fallback"),
            &options,
        )
        .await;
    assert!(skipped.from_fallback);
    assert_eq!(invocations.load(Ordering::SeqCst), 1);

    clock.advance(Duration::from_secs(30));

    let probe = breakers
        .with_circuit_breaker(
            "svcA",
            || async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>("live")
            },
            Fallback::value("fallback"),
            &options,
        )
        .await;
    assert_eq!(probe.result, "live");
    assert!(!probe.from_fallback);
    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    assert!(breakers.open_circuits().is_empty());

    let circuit = labels([("circuit", "svcA")]);
    assert_eq!(metrics.counter_value("circuit_breaker_opened_total", &circuit), Some(1.0));
    assert_eq!(metrics.counter_value("circuit_breaker_rejected_total", &circuit), Some(1.0));
    assert_eq!(metrics.counter_value("circuit_breaker_fallback_total", &circuit), Some(2.0));
}

#[tokio::test]
async fn test_never_invokes_while_open() {
    let (breakers, _, _) = setup();
    let options = CircuitBreakerOptions::with_threshold(2);
    let invocations = Arc::new(AtomicUsize::new(0));

    for _ in 0..2 {
        breakers.record_failure("ephemeris", &options);
    }

    for _ in 0..20 {
        let invocations = Arc::clone(&invocations);
        let outcome = breakers
            .with_circuit_breaker(
                "ephemeris",
                move || async move {
                    invocations.fetch_add(1, Ordering::SeqCst);
                    Ok::<u32, String>(1)
                },
                Fallback::value(0),
                &options,
            )
            .await;
        assert!(outcome.from_fallback);
    }

    assert_eq!(invocations.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failed_probe_reopens() {
    let (breakers, clock, _) = setup();
    let options = CircuitBreakerOptions::with_threshold(1).reset_timeout(Duration::from_secs(5));

    breakers.record_failure("svc", &options);
    clock.advance(Duration::from_secs(5));

    let outcome = breakers
        .with_circuit_breaker(
            "svc",
            || async { Err::<(), _>("still down") },
            Fallback::value(()),
            &options,
        )
        .await;
    assert!(outcome.from_fallback);

    let status = breakers.get_circuit_status("svc").unwrap();
    assert_eq!(status.state, CircuitState::Open);
    assert_eq!(status.failures, 2);
    assert!(breakers.is_circuit_open("svc", &options));
}

#[tokio::test]
async fn test_concurrent_calls_share_state() {
    let (breakers, _, _) = setup();
    let options = CircuitBreakerOptions::with_threshold(1_000);
    let mut tasks = Vec::new();

    for _ in 0..50 {
        let breakers = breakers.clone();
        let options = options.clone();
        tasks.push(tokio::spawn(async move {
            breakers
                .with_circuit_breaker(
                    "flaky",
                    || async { Err::<u8, _>("timeout") },
                    Fallback::value(0),
                    &options,
                )
                .await
        }));
    }

    for task in tasks {
        assert!(task.await.unwrap().from_fallback);
    }

    assert_eq!(breakers.get_circuit_status("flaky").unwrap().failures, 50);
}
