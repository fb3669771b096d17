use std::time::Duration;
use std::fmt;

#[cfg(feature = "telemetry-json")]
use serde_json::json;

/// Policy events emitted during execution.
///
/// All Nine Lives policies emit structured events that describe their behavior.
/// These events can be collected, aggregated, and used for observability,
/// monitoring, or autonomous control.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyEvent {
    /// Retry policy events
    Retry(RetryEvent),
    /// Circuit breaker events
    CircuitBreaker(CircuitBreakerEvent),
    /// Bulkhead events
    Bulkhead(BulkheadEvent),
    /// Timeout events
    Timeout(TimeoutEvent),
    /// Request outcome events (emitted by all policies)
    Request(RequestOutcome),
    /// Fair scheduler events
    Scheduler(SchedulerEvent),
    /// Stream fanout events
    Fanout(FanoutEvent),
    /// Connection pool events
    Pool(PoolEvent),
    /// Historical metrics rollup events
    Metrics(MetricsEvent),
}

/// Events emitted by the fair scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerEvent {
    /// A request was admitted to a per-key queue.
    Enqueued { api_key_hash: u64, queue_depth: usize },
    /// A request was handed a dispatch slot.
    Dispatched { api_key_hash: u64, waited: Duration },
    /// A request's wait exceeded the configured queue timeout.
    TimedOut { api_key_hash: u64, waited: Duration },
    /// The scheduler rejected a request because its queue was full.
    QueueFull { depth: usize, capacity: usize },
}

/// Events emitted by stream fanout/deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutEvent {
    /// A new upstream stream was opened for a content hash not already in flight.
    StreamOpened { subscriber_count: usize },
    /// A caller joined an already in-flight stream instead of opening a new one.
    StreamJoined { subscriber_count: usize },
    /// A subscriber could not keep up and was dropped.
    SubscriberLagged,
    /// A stream completed and was swept from the registry.
    StreamClosed { chunks_published: u64 },
}

/// Events emitted by the connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// A new client was built for a previously unseen pool key.
    ClientCreated,
    /// An existing client was reused.
    ClientReused,
    /// The pool was reconfigured, discarding cached clients.
    Reconfigured { clients_discarded: usize },
}

/// Events emitted as historical metrics roll sealed buckets forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsEvent {
    /// A one-second bucket was sealed into the ring.
    BucketSealed { granularity: MetricsGranularity, tokens: u64 },
}

/// Which of the four ring-buffer granularities a [`MetricsEvent`] concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsGranularity {
    Second,
    Minute,
    Hour,
    Day,
}

impl fmt::Display for MetricsGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsGranularity::Second => write!(f, "second"),
            MetricsGranularity::Minute => write!(f, "minute"),
            MetricsGranularity::Hour => write!(f, "hour"),
            MetricsGranularity::Day => write!(f, "day"),
        }
    }
}

/// Events emitted by retry policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryEvent {
    /// A retry attempt is about to be made.
    ///
    /// Emitted before sleeping and retrying a failed request.
    Attempt {
        /// The attempt number (1-indexed)
        attempt: usize,
        /// The backoff delay before this retry
        delay: Duration,
    },
    /// All retry attempts have been exhausted.
    ///
    /// Emitted when the maximum number of retries is reached
    /// and the request still fails.
    Exhausted {
        /// Total number of attempts made
        total_attempts: usize,
        /// Total time spent retrying
        total_duration: Duration,
    },
}

/// Events emitted by circuit breaker policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitBreakerEvent {
    /// Circuit transitioned to open state.
    ///
    /// Subsequent requests will be rejected immediately without
    /// being forwarded to the inner service.
    Opened {
        /// Number of consecutive failures that triggered the open
        failure_count: usize,
    },
    /// Circuit transitioned to half-open state.
    ///
    /// A limited number of test requests will be allowed through
    /// to determine if the inner service has recovered.
    HalfOpen,
    /// Circuit transitioned to closed state.
    ///
    /// Normal operation resumes - all requests are forwarded.
    Closed,
}

/// Events emitted by bulkhead policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkheadEvent {
    /// A request successfully acquired a bulkhead permit.
    ///
    /// The request will proceed to the inner service.
    Acquired {
        /// Current number of active requests
        active_count: usize,
        /// Maximum concurrency limit
        max_concurrency: usize,
    },
    /// A request was rejected due to bulkhead saturation.
    ///
    /// All available permits are in use.
    Rejected {
        /// Current number of active requests
        active_count: usize,
        /// Maximum concurrency limit
        max_concurrency: usize,
    },
}

/// Events emitted by timeout policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutEvent {
    /// A request exceeded the timeout duration.
    ///
    /// The request was cancelled and an error returned.
    Occurred {
        /// The timeout duration that was exceeded
        timeout: Duration,
    },
}

/// Request outcome events emitted by all policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Request completed successfully.
    Success {
        /// Time taken to complete the request
        duration: Duration,
    },
    /// Request failed with an error.
    Failure {
        /// Time taken before failure
        duration: Duration,
    },
}

impl fmt::Display for PolicyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyEvent::Retry(event) => write!(f, "Retry::{}", event),
            PolicyEvent::CircuitBreaker(event) => write!(f, "CircuitBreaker::{}", event),
            PolicyEvent::Bulkhead(event) => write!(f, "Bulkhead::{}", event),
            PolicyEvent::Timeout(event) => write!(f, "Timeout::{}", event),
            PolicyEvent::Request(event) => write!(f, "Request::{}", event),
            PolicyEvent::Scheduler(event) => write!(f, "Scheduler::{}", event),
            PolicyEvent::Fanout(event) => write!(f, "Fanout::{}", event),
            PolicyEvent::Pool(event) => write!(f, "Pool::{}", event),
            PolicyEvent::Metrics(event) => write!(f, "Metrics::{}", event),
        }
    }
}

impl fmt::Display for SchedulerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerEvent::Enqueued { api_key_hash, queue_depth } => {
                write!(f, "Enqueued(key={:x}, depth={})", api_key_hash, queue_depth)
            }
            SchedulerEvent::Dispatched { api_key_hash, waited } => {
                write!(f, "Dispatched(key={:x}, waited={:?})", api_key_hash, waited)
            }
            SchedulerEvent::TimedOut { api_key_hash, waited } => {
                write!(f, "TimedOut(key={:x}, waited={:?})", api_key_hash, waited)
            }
            SchedulerEvent::QueueFull { depth, capacity } => {
                write!(f, "QueueFull({}/{})", depth, capacity)
            }
        }
    }
}

impl fmt::Display for FanoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FanoutEvent::StreamOpened { subscriber_count } => {
                write!(f, "StreamOpened(subscribers={})", subscriber_count)
            }
            FanoutEvent::StreamJoined { subscriber_count } => {
                write!(f, "StreamJoined(subscribers={})", subscriber_count)
            }
            FanoutEvent::SubscriberLagged => write!(f, "SubscriberLagged"),
            FanoutEvent::StreamClosed { chunks_published } => {
                write!(f, "StreamClosed(chunks={})", chunks_published)
            }
        }
    }
}

impl fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEvent::ClientCreated => write!(f, "ClientCreated"),
            PoolEvent::ClientReused => write!(f, "ClientReused"),
            PoolEvent::Reconfigured { clients_discarded } => {
                write!(f, "Reconfigured(discarded={})", clients_discarded)
            }
        }
    }
}

impl fmt::Display for MetricsEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricsEvent::BucketSealed { granularity, tokens } => {
                write!(f, "BucketSealed({}, tokens={})", granularity, tokens)
            }
        }
    }
}

impl fmt::Display for RetryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryEvent::Attempt { attempt, delay } => {
                write!(f, "Attempt(#{}, delay={:?})", attempt, delay)
            }
            RetryEvent::Exhausted { total_attempts, total_duration } => {
                write!(f, "Exhausted(attempts={}, duration={:?})", total_attempts, total_duration)
            }
        }
    }
}

impl fmt::Display for CircuitBreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitBreakerEvent::Opened { failure_count } => {
                write!(f, "Opened(failures={})", failure_count)
            }
            CircuitBreakerEvent::HalfOpen => write!(f, "HalfOpen"),
            CircuitBreakerEvent::Closed => write!(f, "Closed"),
        }
    }
}

impl fmt::Display for BulkheadEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkheadEvent::Acquired { active_count, max_concurrency } => {
                write!(f, "Acquired({}/{})", active_count, max_concurrency)
            }
            BulkheadEvent::Rejected { active_count, max_concurrency } => {
                write!(f, "Rejected({}/{})", active_count, max_concurrency)
            }
        }
    }
}

impl fmt::Display for TimeoutEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutEvent::Occurred { timeout } => write!(f, "Occurred(timeout={:?})", timeout),
        }
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestOutcome::Success { duration } => write!(f, "Success(duration={:?})", duration),
            RequestOutcome::Failure { duration } => write!(f, "Failure(duration={:?})", duration),
        }
    }
}

#[cfg_attr(not(feature = "telemetry-json"), allow(dead_code))]
#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a PolicyEvent into a JSON value for sinks.
#[cfg(feature = "telemetry-json")]
pub fn event_to_json(event: &PolicyEvent) -> serde_json::Value {
    match event {
        PolicyEvent::Retry(r) => match r {
            RetryEvent::Attempt { attempt, delay } => json!({
                "kind": "retry_attempt",
                "attempt": *attempt,
                "delay_ms": clamp_u64(delay.as_millis()),
            }),
            RetryEvent::Exhausted { total_attempts, total_duration } => json!({
                "kind": "retry_exhausted",
                "attempts": *total_attempts,
                "duration_ms": clamp_u64(total_duration.as_millis()),
            }),
        },
        PolicyEvent::CircuitBreaker(c) => match c {
            CircuitBreakerEvent::Opened { failure_count } => {
                json!({ "kind": "circuit_opened", "failures": *failure_count })
            }
            CircuitBreakerEvent::HalfOpen => json!({ "kind": "circuit_half_open" }),
            CircuitBreakerEvent::Closed => json!({ "kind": "circuit_closed" }),
        },
        PolicyEvent::Bulkhead(b) => match b {
            BulkheadEvent::Acquired { active_count, max_concurrency } => json!({
                "kind": "bulkhead_acquired",
                "active": *active_count,
                "max": *max_concurrency
            }),
            BulkheadEvent::Rejected { active_count, max_concurrency } => json!({
                "kind": "bulkhead_rejected",
                "active": *active_count,
                "max": *max_concurrency
            }),
        },
        PolicyEvent::Timeout(t) => match t {
            TimeoutEvent::Occurred { timeout } => json!({
                "kind": "timeout",
                "timeout_ms": clamp_u64(timeout.as_millis())
            }),
        },
        PolicyEvent::Request(r) => match r {
            RequestOutcome::Success { duration } => json!({
                "kind": "request_success",
                "duration_ms": clamp_u64(duration.as_millis())
            }),
            RequestOutcome::Failure { duration } => json!({
                "kind": "request_failure",
                "duration_ms": clamp_u64(duration.as_millis())
            }),
        },
        PolicyEvent::Scheduler(s) => match s {
            SchedulerEvent::Enqueued { api_key_hash, queue_depth } => json!({
                "kind": "scheduler_enqueued",
                "api_key_hash": *api_key_hash,
                "queue_depth": *queue_depth,
            }),
            SchedulerEvent::Dispatched { api_key_hash, waited } => json!({
                "kind": "scheduler_dispatched",
                "api_key_hash": *api_key_hash,
                "waited_ms": clamp_u64(waited.as_millis()),
            }),
            SchedulerEvent::TimedOut { api_key_hash, waited } => json!({
                "kind": "scheduler_timed_out",
                "api_key_hash": *api_key_hash,
                "waited_ms": clamp_u64(waited.as_millis()),
            }),
            SchedulerEvent::QueueFull { depth, capacity } => json!({
                "kind": "scheduler_queue_full",
                "depth": *depth,
                "capacity": *capacity,
            }),
        },
        PolicyEvent::Fanout(fa) => match fa {
            FanoutEvent::StreamOpened { subscriber_count } => json!({
                "kind": "fanout_stream_opened",
                "subscribers": *subscriber_count,
            }),
            FanoutEvent::StreamJoined { subscriber_count } => json!({
                "kind": "fanout_stream_joined",
                "subscribers": *subscriber_count,
            }),
            FanoutEvent::SubscriberLagged => json!({ "kind": "fanout_subscriber_lagged" }),
            FanoutEvent::StreamClosed { chunks_published } => json!({
                "kind": "fanout_stream_closed",
                "chunks_published": *chunks_published,
            }),
        },
        PolicyEvent::Pool(p) => match p {
            PoolEvent::ClientCreated => json!({ "kind": "pool_client_created" }),
            PoolEvent::ClientReused => json!({ "kind": "pool_client_reused" }),
            PoolEvent::Reconfigured { clients_discarded } => json!({
                "kind": "pool_reconfigured",
                "clients_discarded": *clients_discarded,
            }),
        },
        PolicyEvent::Metrics(m) => match m {
            MetricsEvent::BucketSealed { granularity, tokens } => json!({
                "kind": "metrics_bucket_sealed",
                "granularity": granularity.to_string(),
                "tokens": *tokens,
            }),
        },
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_event_display() {
        let event = RetryEvent::Attempt { attempt: 2, delay: Duration::from_millis(100) };
        assert!(event.to_string().contains("Attempt"));
        assert!(event.to_string().contains("#2"));
    }

    #[test]
    fn test_circuit_breaker_event_display() {
        let event = CircuitBreakerEvent::Opened { failure_count: 5 };
        assert!(event.to_string().contains("Opened"));
        assert!(event.to_string().contains("5"));
    }

    #[test]
    fn test_bulkhead_event_display() {
        let event = BulkheadEvent::Rejected { active_count: 10, max_concurrency: 10 };
        assert!(event.to_string().contains("Rejected"));
        assert!(event.to_string().contains("10/10"));
    }

    #[test]
    fn test_policy_event_clone() {
        let event = PolicyEvent::Retry(RetryEvent::Attempt {
            attempt: 1,
            delay: Duration::from_millis(50),
        });
        let cloned = event.clone();
        assert_eq!(event, cloned);
    }

    #[test]
    fn test_policy_event_request_variants_display() {
        let ok =
            PolicyEvent::Request(RequestOutcome::Success { duration: Duration::from_millis(5) });
        let err =
            PolicyEvent::Request(RequestOutcome::Failure { duration: Duration::from_millis(7) });
        assert!(format!("{}", ok).contains("Success"));
        assert!(format!("{}", err).contains("Failure"));
    }
}
