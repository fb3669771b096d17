//! Prometheus metrics sink for `ninelives`.
//! Bring your own `prometheus::Registry`; counters, gauges and a histogram
//! are registered and updated as `PolicyEvent`s arrive.

use ninelives::telemetry::{
    BulkheadEvent, CircuitBreakerEvent, FanoutEvent, MetricsEvent, PolicyEvent, PoolEvent,
    RequestOutcome, RetryEvent, SchedulerEvent, TelemetrySink, TimeoutEvent,
};
use prometheus::{HistogramVec, IntCounterVec, IntGaugeVec, Registry};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Clone, Debug)]
pub struct PrometheusSink {
    registry: Arc<Registry>,
    counter: IntCounterVec,
    /// Point-in-time gauges: scheduler queue depth and connection pool size.
    /// Both are single-value snapshots at the moment their event fired, not
    /// an aggregate — a scrape between events sees the last-reported value.
    gauge: IntGaugeVec,
    /// Wait/duration histograms, labeled by what was measured (`dispatch_wait`,
    /// `request`).
    histogram: HistogramVec,
}

impl PrometheusSink {
    /// Create a sink and register its metrics into the provided registry.
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered (e.g. name conflict).
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();
        let counter = IntCounterVec::new(
            prometheus::Opts::new("ninelives_events_total", "Policy events"),
            &["policy", "event"],
        )?;
        registry.register(Box::new(counter.clone()))?;

        let gauge = IntGaugeVec::new(
            prometheus::Opts::new("ninelives_gateway_gauge", "Point-in-time gateway gauges"),
            &["gauge"],
        )?;
        registry.register(Box::new(gauge.clone()))?;

        let histogram = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "ninelives_gateway_duration_seconds",
                "Gateway wait/duration measurements",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(histogram.clone()))?;

        Ok(Self { registry, counter, gauge, histogram })
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl tower_service::Service<PolicyEvent> for PrometheusSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: PolicyEvent) -> Self::Future {
        let (policy_label, event_label) = match &event {
            PolicyEvent::Retry(r) => (
                "retry",
                match r {
                    RetryEvent::Attempt { .. } => "attempt",
                    RetryEvent::Exhausted { .. } => "exhausted",
                },
            ),
            PolicyEvent::CircuitBreaker(c) => (
                "circuit_breaker",
                match c {
                    CircuitBreakerEvent::Opened { .. } => "opened",
                    CircuitBreakerEvent::HalfOpen => "half_open",
                    CircuitBreakerEvent::Closed => "closed",
                },
            ),
            PolicyEvent::Bulkhead(b) => (
                "bulkhead",
                match b {
                    BulkheadEvent::Acquired { .. } => "acquired",
                    BulkheadEvent::Rejected { .. } => "rejected",
                },
            ),
            PolicyEvent::Timeout(t) => (
                "timeout",
                match t {
                    TimeoutEvent::Occurred { .. } => "occurred",
                },
            ),
            PolicyEvent::Request(r) => {
                let duration = match r {
                    RequestOutcome::Success { duration } => *duration,
                    RequestOutcome::Failure { duration } => *duration,
                };
                self.histogram.with_label_values(&["request"]).observe(duration.as_secs_f64());
                (
                    "request",
                    match r {
                        RequestOutcome::Success { .. } => "success",
                        RequestOutcome::Failure { .. } => "failure",
                    },
                )
            }
            PolicyEvent::Scheduler(s) => {
                match s {
                    SchedulerEvent::Enqueued { queue_depth, .. } => {
                        self.gauge
                            .with_label_values(&["scheduler_queue_depth"])
                            .set(*queue_depth as i64);
                    }
                    SchedulerEvent::Dispatched { waited, .. } => {
                        self.histogram
                            .with_label_values(&["dispatch_wait"])
                            .observe(waited.as_secs_f64());
                    }
                    SchedulerEvent::TimedOut { waited, .. } => {
                        self.histogram
                            .with_label_values(&["dispatch_wait"])
                            .observe(waited.as_secs_f64());
                    }
                    SchedulerEvent::QueueFull { .. } => {}
                }
                (
                    "scheduler",
                    match s {
                        SchedulerEvent::Enqueued { .. } => "enqueued",
                        SchedulerEvent::Dispatched { .. } => "dispatched",
                        SchedulerEvent::TimedOut { .. } => "timed_out",
                        SchedulerEvent::QueueFull { .. } => "queue_full",
                    },
                )
            }
            PolicyEvent::Fanout(fa) => (
                "fanout",
                match fa {
                    FanoutEvent::StreamOpened { .. } => "stream_opened",
                    FanoutEvent::StreamJoined { .. } => "stream_joined",
                    FanoutEvent::SubscriberLagged => "subscriber_lagged",
                    FanoutEvent::StreamClosed { .. } => "stream_closed",
                },
            ),
            PolicyEvent::Pool(p) => {
                if let PoolEvent::Reconfigured { clients_discarded } = p {
                    self.gauge
                        .with_label_values(&["pool_clients_discarded"])
                        .set(*clients_discarded as i64);
                }
                (
                    "pool",
                    match p {
                        PoolEvent::ClientCreated => "client_created",
                        PoolEvent::ClientReused => "client_reused",
                        PoolEvent::Reconfigured { .. } => "reconfigured",
                    },
                )
            }
            PolicyEvent::Metrics(m) => (
                "metrics",
                match m {
                    MetricsEvent::BucketSealed { .. } => "bucket_sealed",
                },
            ),
        };
        let c = self.counter.clone();
        c.with_label_values(&[policy_label, event_label]).inc();
        ready(Ok(()))
    }
}

impl TelemetrySink for PrometheusSink {
    type SinkError = Infallible;
}
