//! Compile-time prelude coverage test.
use ninelives::prelude::*;
use std::time::Duration;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let _backoff = Backoff::constant(Duration::from_millis(1));
    let _jitter = Jitter::None;
    let _timeout_layer = TimeoutLayer::new(Duration::from_millis(10)).unwrap();

    let endpoint = Endpoint::new("openai", "acct-a", "https://api.openai.com");
    let endpoints = EndpointSet::new(CircuitBreakerConfig::default());
    assert!(endpoints.allow(&endpoint));

    let pool = ConnectionPool::new(PoolConfig::default());
    assert!(pool.is_empty());

    let scheduler = FairScheduler::new(SchedulerConfig::default());
    let _ = scheduler.recent_durations();

    let fanout = StreamFanout::new(16, Duration::from_secs(30));
    assert!(fanout.is_empty());

    let metrics = HistoricalMetrics::new();
    assert_eq!(metrics.total_requests(), 0);

    let config = GatewayConfig::default();
    let _: PoolConfig = (&config.http_pool).into();

    let sink = MemorySink::new();
    fn assert_telemetry_sink<S: TelemetrySink>(_s: &S) {}
    assert_telemetry_sink(&sink);
}
