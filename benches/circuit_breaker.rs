use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ninelives::{CircuitBreakerConfig, CircuitBreakerPolicy, ResilienceError};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, thiserror::Error)]
#[error("boom")]
struct BenchError;

fn circuit_breaker_throughput_success(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig {
        failure_threshold: 10,
        recovery_timeout: Duration::from_secs(30),
        half_open_max_calls: 1,
    });

    c.bench_function("circuit_breaker_success_100k_rps", |b| {
        b.to_async(&rt).iter(|| async {
            let breaker = breaker.clone();
            let _ = black_box(
                breaker
                    .execute(|| async { Ok::<_, ResilienceError<BenchError>>(black_box("request")) })
                    .await,
            );
        });
    });
}

fn circuit_breaker_throughput_failure(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let breaker = CircuitBreakerPolicy::with_config(CircuitBreakerConfig {
        failure_threshold: 1, // Open on first failure
        recovery_timeout: Duration::from_secs(30),
        half_open_max_calls: 1,
    });
    let calls = Arc::new(AtomicUsize::new(0));

    c.bench_function("circuit_breaker_failure_100k_rps", |b| {
        b.to_async(&rt).iter(|| {
            let breaker = breaker.clone();
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::Relaxed);
                let _ = black_box(
                    breaker
                        .execute(|| async { Err::<&'static str, _>(ResilienceError::Inner(BenchError)) })
                        .await,
                );
            }
        });
    });
}

criterion_group!(benches, circuit_breaker_throughput_success, circuit_breaker_throughput_failure);
criterion_main!(benches);
