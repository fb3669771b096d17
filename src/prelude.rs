//! Convenient re-exports for common gateway types.
pub use crate::{
    adaptive::Adaptive,
    backoff::{calculate_retry_delay, Backoff, MIN_RETRY_DELAY},
    bulkhead::BulkheadPolicy,
    circuit_breaker::{CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerPolicy, CircuitState},
    config::GatewayConfig,
    endpoint::{Endpoint, EndpointSet},
    executor::{
        AuthInfo, Chunk, CredentialStore, ExecuteRequest, Executor, UpstreamCall, UpstreamError,
        UpstreamResponse, UpstreamStream, WireTranslator,
    },
    fanout::{FanoutError, StreamEvent, StreamFanout, StreamKey},
    jitter::Jitter,
    metrics::{Granularity, HistoricalMetrics, MetricBucket, MetricsStore, NullMetricsStore},
    pool::{ConnectionPool, PoolConfig, PoolError, PoolKey},
    retry::{BuildError, RetryConfig, RetryEngine, RetryOutcome, RetryPolicy, RetryPolicyBuilder},
    scheduler::{DispatchTicket, FairScheduler, ScheduleError, SchedulerConfig},
    telemetry::{
        BulkheadEvent, CircuitBreakerEvent, FallbackSink, FanoutEvent, LogSink, MemorySink,
        MetricsEvent, MetricsGranularity, MulticastSink, NullSink, PolicyEvent, PoolEvent,
        RequestOutcome, RetryEvent, SchedulerEvent, StreamingSink, TelemetrySink, TimeoutEvent,
    },
    timeout::{TimeoutError, TimeoutLayer, TimeoutPolicy, MAX_TIMEOUT},
    GatewayError, ResilienceError,
};
