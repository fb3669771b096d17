//! Composes every other subsystem in this crate behind a single
//! `execute`/`execute_stream` contract: schedule → pick an endpoint whose
//! breaker allows it → borrow a pooled transport → retry the upstream call →
//! record the outcome into the breaker, the historical metrics and the
//! telemetry sink.
//!
//! The HTTP round-trip itself, and any provider wire-format translation, are
//! behind two caller-supplied traits (`UpstreamCall`, `UpstreamStream`) —
//! this module never speaks a provider's wire format. `WireTranslator` and
//! `CredentialStore` are declared here as the external seams `Executor`'s
//! callers are expected to sit behind (an HTTP handler layer calls them
//! before constructing an `ExecuteRequest` and after receiving a response);
//! `Executor` itself never calls them.

use crate::endpoint::{Endpoint, EndpointSet};
use crate::error::GatewayError;
use crate::fanout::{SharedStream, StreamEvent, StreamFanout, StreamKey};
use crate::metrics::HistoricalMetrics;
use crate::pool::{ConnectionPool, PoolKey};
use crate::retry::{is_retryable_status, AttemptOutcome, RetryEngine, RetryOutcome};
use crate::scheduler::{FairScheduler, ScheduleError};
use crate::telemetry::{
    emit_best_effort, FanoutEvent, PolicyEvent, PoolEvent, RequestOutcome, SchedulerEvent,
    TelemetrySink,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const STREAM_SUBSCRIBER_BUFFER: usize = 32;
const UPSTREAM_CHUNK_BUFFER: usize = 32;

/// One gateway request, already past wire-format translation — everything
/// `Executor` needs to route, schedule and retry it.
#[derive(Debug, Clone)]
pub struct ExecuteRequest {
    /// Candidate endpoints, tried in this order.
    pub endpoints: Vec<Endpoint>,
    pub api_key: String,
    pub model: String,
    pub payload: Bytes,
    pub estimated_tokens: u64,
    pub headers: HashMap<String, String>,
    pub proxy_url: Option<String>,
    /// Opaque routing hint, passed through to `UpstreamCall`/`UpstreamStream`
    /// unexamined.
    pub alt: Option<String>,
}

/// One streamed chunk handed to the caller of `Executor::execute_stream`.
/// Mirrors the `StreamEvent` shape with the fields this crate's
/// `fanout` module actually tracks: a publisher-order sequence number
/// standing in for a separate event id, and no distinct `eventType` since
/// this crate does not multiplex SSE event kinds itself.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub seq: u64,
    pub data: Bytes,
}

impl From<StreamEvent> for Chunk {
    fn from(event: StreamEvent) -> Self {
        Chunk { seq: event.seq, data: event.data }
    }
}

/// A completed, non-streamed upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// The error an `UpstreamCall`/`UpstreamStream` implementation reports for a
/// failed attempt. Carries the status so [`Executor`] can re-derive
/// retryability after [`RetryEngine::run`] has exhausted or short-circuited,
/// without threading extra state through the retry loop.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream returned status {status}: {message}")]
    Http { status: u16, message: String },
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// One non-streamed HTTP round-trip to an upstream provider. Implementations
/// own translating `ExecuteRequest::payload` into a provider-native request
/// and classifying the response into [`AttemptOutcome`] — the only place
/// `is_retryable_status` needs to be consulted by the caller, though
/// `Executor` re-derives the same classification from the returned error on
/// exhaustion since [`RetryEngine::run`] only returns the last error.
#[async_trait]
pub trait UpstreamCall: Send + Sync + 'static {
    async fn call(
        &self,
        client: &reqwest::Client,
        endpoint: &Endpoint,
        req: &ExecuteRequest,
        attempt: usize,
    ) -> AttemptOutcome<UpstreamResponse, UpstreamError>;
}

/// One streamed upstream connection. The implementation pumps raw chunk
/// bytes into `sink` as they arrive and returns once the upstream stream
/// ends (cleanly or with an error reported as the final `sink` item);
/// `Executor::execute_stream` is what turns those bytes into [`Chunk`]s and
/// fans them out via [`StreamFanout`].
#[async_trait]
pub trait UpstreamStream: Send + Sync + 'static {
    async fn call_stream(
        &self,
        client: Arc<reqwest::Client>,
        endpoint: Endpoint,
        req: ExecuteRequest,
        sink: mpsc::Sender<Result<Bytes, UpstreamError>>,
    );
}

/// Bidirectional provider wire-format translation, consumed by the HTTP
/// handler layer that sits in front of `Executor` — never called by
/// `Executor` itself. Declared here because it is one of the two external
/// collaborators spec §6 names alongside `CredentialStore`.
#[async_trait]
pub trait WireTranslator: Send + Sync + 'static {
    async fn translate(
        &self,
        source_wire: &str,
        target_wire: &str,
        request_bytes: &[u8],
    ) -> Result<Bytes, GatewayError>;

    async fn translate_response(
        &self,
        source_wire: &str,
        target_wire: &str,
        response_bytes: &[u8],
    ) -> Result<Bytes, GatewayError>;

    async fn translate_stream_chunk(
        &self,
        source_wire: &str,
        target_wire: &str,
        chunk_bytes: &[u8],
        state: &mut serde_json::Value,
    ) -> Result<Vec<Bytes>, GatewayError>;
}

/// What a credential store hands back for an API key: which endpoint to
/// route to, which headers to attach, and an optional proxy. Consumed by the
/// same handler layer as [`WireTranslator`], before it builds an
/// [`ExecuteRequest`].
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub endpoint: Endpoint,
    pub headers: HashMap<String, String>,
    pub proxy_url: Option<String>,
}

#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    async fn get_auth(&self, api_key: &str) -> Result<AuthInfo, GatewayError>;
}

fn hash_api_key(api_key: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    api_key.hash(&mut hasher);
    hasher.finish()
}

fn map_schedule_error(err: ScheduleError) -> GatewayError {
    match err {
        ScheduleError::QueueFull { depth, capacity } => GatewayError::QueueFull { depth, capacity },
        ScheduleError::Timeout { waited } => GatewayError::Timeout { elapsed: waited },
        ScheduleError::Cancelled => GatewayError::Cancelled,
    }
}

fn classify_failure(
    endpoints: &EndpointSet,
    endpoint: &Endpoint,
    attempts: usize,
    err: UpstreamError,
) -> GatewayError {
    match &err {
        UpstreamError::Http { status, .. } if is_retryable_status(*status) => {
            endpoints.record_failure(endpoint);
            GatewayError::UpstreamRetryable { status: *status, attempts, source: Box::new(err) }
        }
        UpstreamError::Http { status, .. } => {
            GatewayError::UpstreamFatal { status: *status, source: Box::new(err) }
        }
        UpstreamError::Transport(_) => {
            endpoints.record_failure(endpoint);
            GatewayError::UpstreamRetryable { status: 0, attempts, source: Box::new(err) }
        }
    }
}

/// Composes [`EndpointSet`], [`ConnectionPool`], [`RetryEngine`],
/// [`FairScheduler`], [`StreamFanout`] and [`HistoricalMetrics`] behind
/// `execute`/`execute_stream`, emitting a [`PolicyEvent`] at every
/// transition a caller would want to observe.
///
/// Cheap to clone: every field is itself an `Arc`-shared handle (or, for
/// `sink`, a type the [`TelemetrySink`] contract already requires to be
/// cheaply `Clone`).
pub struct Executor<U, St, Sink>
where
    U: UpstreamCall,
    St: UpstreamStream,
    Sink: TelemetrySink,
{
    endpoints: Arc<EndpointSet>,
    pool: Arc<ConnectionPool>,
    retry: Arc<RetryEngine>,
    scheduler: Arc<FairScheduler>,
    fanout: Arc<StreamFanout>,
    metrics: Arc<HistoricalMetrics>,
    sink: Sink,
    upstream: Arc<U>,
    upstream_stream: Arc<St>,
}

impl<U, St, Sink> Clone for Executor<U, St, Sink>
where
    U: UpstreamCall,
    St: UpstreamStream,
    Sink: TelemetrySink,
{
    fn clone(&self) -> Self {
        Self {
            endpoints: self.endpoints.clone(),
            pool: self.pool.clone(),
            retry: self.retry.clone(),
            scheduler: self.scheduler.clone(),
            fanout: self.fanout.clone(),
            metrics: self.metrics.clone(),
            sink: self.sink.clone(),
            upstream: self.upstream.clone(),
            upstream_stream: self.upstream_stream.clone(),
        }
    }
}

impl<U, St, Sink> Executor<U, St, Sink>
where
    U: UpstreamCall,
    St: UpstreamStream,
    Sink: TelemetrySink,
    Sink::Future: Send + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoints: Arc<EndpointSet>,
        pool: Arc<ConnectionPool>,
        retry: Arc<RetryEngine>,
        scheduler: Arc<FairScheduler>,
        fanout: Arc<StreamFanout>,
        metrics: Arc<HistoricalMetrics>,
        sink: Sink,
        upstream: Arc<U>,
        upstream_stream: Arc<St>,
    ) -> Self {
        Self { endpoints, pool, retry, scheduler, fanout, metrics, sink, upstream, upstream_stream }
    }

    /// Build every subsystem straight from a [`crate::config::GatewayConfig`],
    /// the composition root a caller reaches for instead of constructing and
    /// wiring each subsystem's native config by hand. Every group in `config`
    /// — including `scheduler`'s `default_weight`/`max_queue_size`, which
    /// `SchedulerConfig` now carries directly — reaches the subsystem it
    /// configures.
    pub fn from_config(
        config: &crate::config::GatewayConfig,
        sink: Sink,
        upstream: Arc<U>,
        upstream_stream: Arc<St>,
    ) -> Self {
        let endpoints = Arc::new(EndpointSet::new((&config.circuit_breaker).into()));
        let pool = Arc::new(ConnectionPool::new((&config.http_pool).into()));
        let retry = Arc::new(RetryEngine::new((&config.retry).into()));
        let scheduler = Arc::new(FairScheduler::new((&config.scheduler).into()));
        let fanout = Arc::new(StreamFanout::new(
            config.stream_fanout.buffer_size,
            std::time::Duration::from_secs(config.stream_fanout.dedup_window_seconds),
        ));
        let metrics = Arc::new(HistoricalMetrics::new());
        Self::new(endpoints, pool, retry, scheduler, fanout, metrics, sink, upstream, upstream_stream)
    }

    /// Re-derive every subsystem's native config from `config` and swap it
    /// in. `endpoints`' breaker config and the scheduler's per-key weight map
    /// aren't reconfigurable in place today and are left untouched; this
    /// updates what each subsystem's own `reconfigure`/setter already
    /// exposes.
    pub fn reconfigure(&self, config: &crate::config::GatewayConfig) {
        self.pool.reconfigure((&config.http_pool).into());
    }

    async fn emit(&self, event: PolicyEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }

    /// Schedule, route, retry and record one non-streamed request.
    pub async fn execute(
        &self,
        ctx: CancellationToken,
        req: ExecuteRequest,
    ) -> Result<UpstreamResponse, GatewayError> {
        let depth_before = self.scheduler.queue_depth().await;
        self.emit(PolicyEvent::Scheduler(SchedulerEvent::Enqueued {
            api_key_hash: hash_api_key(&req.api_key),
            queue_depth: depth_before,
        }))
        .await;

        let schedule_start = Instant::now();
        let scheduled = self
            .scheduler
            .schedule_cancellable(&req.api_key, req.estimated_tokens.max(1), &ctx)
            .await;

        let ticket = match scheduled {
            Ok(ticket) => ticket,
            Err(ScheduleError::Timeout { waited }) => {
                self.emit(PolicyEvent::Scheduler(SchedulerEvent::TimedOut {
                    api_key_hash: hash_api_key(&req.api_key),
                    waited,
                }))
                .await;
                return Err(map_schedule_error(ScheduleError::Timeout { waited }));
            }
            Err(err @ ScheduleError::QueueFull { depth, capacity }) => {
                self.emit(PolicyEvent::Scheduler(SchedulerEvent::QueueFull { depth, capacity }))
                    .await;
                return Err(map_schedule_error(err));
            }
            Err(err) => return Err(map_schedule_error(err)),
        };

        let waited = ticket.dispatched_at().saturating_duration_since(schedule_start);
        self.emit(PolicyEvent::Scheduler(SchedulerEvent::Dispatched {
            api_key_hash: hash_api_key(&req.api_key),
            waited,
        }))
        .await;

        // the dispatch slot (and its concurrency permit) is held for the
        // entire round-trip below, released only when `ticket` drops here.
        let result = self.execute_dispatched(&ctx, &req).await;
        drop(ticket);
        result
    }

    async fn execute_dispatched(
        &self,
        ctx: &CancellationToken,
        req: &ExecuteRequest,
    ) -> Result<UpstreamResponse, GatewayError> {
        let Some(endpoint) = self.endpoints.first_available(&req.endpoints).cloned() else {
            return Err(GatewayError::CircuitOpen { endpoint: "none-available".to_string() });
        };

        let mut pool_key = PoolKey::new(endpoint.provider.clone(), endpoint.base_url.clone());
        if let Some(proxy) = &req.proxy_url {
            pool_key = pool_key.with_proxy(proxy.clone());
        }
        let clients_before = self.pool.len();
        let client = self
            .pool
            .get_or_create(&pool_key)
            .map_err(|e| GatewayError::PoolInit(e.to_string()))?;
        let pool_event = if self.pool.len() > clients_before {
            PoolEvent::ClientCreated
        } else {
            PoolEvent::ClientReused
        };
        self.emit(PolicyEvent::Pool(pool_event)).await;

        let attempts = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();

        let result = self
            .retry
            .run(ctx, |attempt| {
                attempts.store(attempt + 1, Ordering::SeqCst);
                let upstream = self.upstream.clone();
                let client = client.clone();
                let endpoint = endpoint.clone();
                async move { upstream.call(&client, &endpoint, req, attempt).await }
            })
            .await;

        let elapsed = started.elapsed();
        self.scheduler.record_duration(elapsed);

        match result {
            Ok(resp) => {
                self.endpoints.record_success(&endpoint);
                self.metrics.record(
                    &req.model,
                    resp.input_tokens,
                    resp.output_tokens,
                    elapsed.as_millis() as u64,
                    true,
                );
                self.emit(PolicyEvent::Request(RequestOutcome::Success { duration: elapsed })).await;
                Ok(resp)
            }
            Err(RetryOutcome::Cancelled) => {
                self.metrics.record(&req.model, 0, 0, elapsed.as_millis() as u64, false);
                self.emit(PolicyEvent::Request(RequestOutcome::Failure { duration: elapsed })).await;
                Err(GatewayError::Cancelled)
            }
            Err(RetryOutcome::Failed(err)) => {
                self.metrics.record(&req.model, 0, 0, elapsed.as_millis() as u64, false);
                self.emit(PolicyEvent::Request(RequestOutcome::Failure { duration: elapsed })).await;
                let attempt_count = attempts.load(Ordering::SeqCst).max(1);
                Err(classify_failure(&self.endpoints, &endpoint, attempt_count, err))
            }
        }
    }

    /// Deduplicate-and-stream a request. Returns a channel of [`Chunk`]s:
    /// the first caller for a given content hash drives the upstream call
    /// and publishes into the shared stream as chunks arrive; later callers
    /// for the same hash just subscribe.
    pub async fn execute_stream(
        &self,
        ctx: CancellationToken,
        req: ExecuteRequest,
    ) -> mpsc::Receiver<Chunk> {
        let key = StreamKey::compute(&req.model, &req.payload);
        let (shared, is_owner) = self.fanout.get_or_create(key);

        let (out_tx, out_rx) = mpsc::channel(STREAM_SUBSCRIBER_BUFFER);
        let (mut sub_rx, replay) = shared.subscribe();

        let forward_ctx = ctx.clone();
        tokio::spawn(async move {
            for event in replay {
                if out_tx.send(Chunk::from(event)).await.is_err() {
                    return;
                }
            }
            loop {
                tokio::select! {
                    maybe = sub_rx.recv() => {
                        match maybe {
                            Some(event) => {
                                if out_tx.send(Chunk::from(event)).await.is_err() {
                                    return;
                                }
                            }
                            None => return,
                        }
                    }
                    _ = forward_ctx.cancelled() => return,
                }
            }
        });

        if is_owner {
            self.emit(PolicyEvent::Fanout(FanoutEvent::StreamOpened {
                subscriber_count: shared.subscriber_count(),
            }))
            .await;
            let this = self.clone();
            tokio::spawn(async move {
                this.drive_upstream_stream(ctx, req, shared).await;
            });
        } else {
            self.emit(PolicyEvent::Fanout(FanoutEvent::StreamJoined {
                subscriber_count: shared.subscriber_count(),
            }))
            .await;
        }

        out_rx
    }

    async fn drive_upstream_stream(
        &self,
        ctx: CancellationToken,
        req: ExecuteRequest,
        shared: Arc<SharedStream>,
    ) {
        let scheduled = self
            .scheduler
            .schedule_cancellable(&req.api_key, req.estimated_tokens.max(1), &ctx)
            .await;
        let ticket = match scheduled {
            Ok(ticket) => ticket,
            Err(_) => {
                shared.finish();
                return;
            }
        };

        let Some(endpoint) = self.endpoints.first_available(&req.endpoints).cloned() else {
            drop(ticket);
            shared.finish();
            return;
        };

        let mut pool_key = PoolKey::new(endpoint.provider.clone(), endpoint.base_url.clone());
        if let Some(proxy) = &req.proxy_url {
            pool_key = pool_key.with_proxy(proxy.clone());
        }
        let client = match self.pool.get_or_create(&pool_key) {
            Ok(client) => client,
            Err(_) => {
                drop(ticket);
                shared.finish();
                return;
            }
        };

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Result<Bytes, UpstreamError>>(UPSTREAM_CHUNK_BUFFER);
        let upstream = self.upstream_stream.clone();
        let call_client = client.clone();
        let call_endpoint = endpoint.clone();
        let call_req = req.clone();
        tokio::spawn(async move {
            upstream.call_stream(call_client, call_endpoint, call_req, chunk_tx).await;
        });

        let started = Instant::now();
        let mut chunks_published: u64 = 0;
        let mut failed = false;
        loop {
            tokio::select! {
                maybe = chunk_rx.recv() => {
                    match maybe {
                        Some(Ok(bytes)) => {
                            chunks_published += 1;
                            shared.publish(bytes);
                        }
                        Some(Err(_)) => {
                            failed = true;
                            break;
                        }
                        None => break,
                    }
                }
                _ = ctx.cancelled() => {
                    failed = true;
                    break;
                }
            }
        }
        drop(ticket);

        if failed {
            self.endpoints.record_failure(&endpoint);
        } else {
            self.endpoints.record_success(&endpoint);
        }
        let elapsed = started.elapsed();
        self.metrics.record(&req.model, 0, 0, elapsed.as_millis() as u64, !failed);
        self.scheduler.record_duration(elapsed);
        shared.finish();
        self.emit(PolicyEvent::Fanout(FanoutEvent::StreamClosed { chunks_published })).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::pool::PoolConfig;
    use crate::retry::RetryConfig;
    use crate::scheduler::SchedulerConfig;
    use crate::telemetry::MemorySink;
    use crate::InstantSleeper;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct AlwaysOk;

    #[async_trait]
    impl UpstreamCall for AlwaysOk {
        async fn call(
            &self,
            _client: &reqwest::Client,
            _endpoint: &Endpoint,
            _req: &ExecuteRequest,
            _attempt: usize,
        ) -> AttemptOutcome<UpstreamResponse, UpstreamError> {
            AttemptOutcome::Success(UpstreamResponse {
                status: 200,
                body: Bytes::from_static(b"{}"),
                input_tokens: 10,
                output_tokens: 20,
            })
        }
    }

    struct FailsNTimesThenOk {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl UpstreamCall for FailsNTimesThenOk {
        async fn call(
            &self,
            _client: &reqwest::Client,
            _endpoint: &Endpoint,
            _req: &ExecuteRequest,
            _attempt: usize,
        ) -> AttemptOutcome<UpstreamResponse, UpstreamError> {
            if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n == 0 { None } else { Some(n - 1) }
            }).is_ok() {
                return AttemptOutcome::Retryable {
                    status: 503,
                    retry_after: None,
                    error: UpstreamError::Http { status: 503, message: "unavailable".into() },
                };
            }
            AttemptOutcome::Success(UpstreamResponse {
                status: 200,
                body: Bytes::from_static(b"ok"),
                input_tokens: 1,
                output_tokens: 1,
            })
        }
    }

    struct AlwaysFatal;

    #[async_trait]
    impl UpstreamCall for AlwaysFatal {
        async fn call(
            &self,
            _client: &reqwest::Client,
            _endpoint: &Endpoint,
            _req: &ExecuteRequest,
            _attempt: usize,
        ) -> AttemptOutcome<UpstreamResponse, UpstreamError> {
            AttemptOutcome::Fatal(UpstreamError::Http { status: 400, message: "bad request".into() })
        }
    }

    struct NoStreams;

    #[async_trait]
    impl UpstreamStream for NoStreams {
        async fn call_stream(
            &self,
            _client: Arc<reqwest::Client>,
            _endpoint: Endpoint,
            _req: ExecuteRequest,
            sink: mpsc::Sender<Result<Bytes, UpstreamError>>,
        ) {
            let _ = sink.send(Ok(Bytes::from_static(b"chunk-1"))).await;
            let _ = sink.send(Ok(Bytes::from_static(b"chunk-2"))).await;
        }
    }

    fn test_executor<U: UpstreamCall>(
        upstream: U,
    ) -> Executor<U, NoStreams, MemorySink> {
        Executor::new(
            Arc::new(EndpointSet::new(CircuitBreakerConfig {
                failure_threshold: 5,
                recovery_timeout: Duration::from_secs(30),
                half_open_max_calls: 1,
            })),
            Arc::new(ConnectionPool::new(PoolConfig::default())),
            Arc::new(
                RetryEngine::new(RetryConfig {
                    max_retries: 3,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    multiplier: 2.0,
                    jitter_factor: 0.0,
                })
                .with_sleeper(InstantSleeper),
            ),
            Arc::new(FairScheduler::new(SchedulerConfig::default())),
            Arc::new(StreamFanout::new(16, Duration::from_secs(60))),
            Arc::new(HistoricalMetrics::new()),
            MemorySink::new(),
            Arc::new(upstream),
            Arc::new(NoStreams),
        )
    }

    fn test_request(endpoint: Endpoint) -> ExecuteRequest {
        ExecuteRequest {
            endpoints: vec![endpoint],
            api_key: "key-a".to_string(),
            model: "gpt-4".to_string(),
            payload: Bytes::from_static(b"{}"),
            estimated_tokens: 1,
            headers: HashMap::new(),
            proxy_url: None,
            alt: None,
        }
    }

    #[tokio::test]
    async fn successful_request_records_success_and_metrics() {
        let executor = test_executor(AlwaysOk);
        let scheduler_clone = executor.scheduler.clone();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move { scheduler_clone.run(rx).await });

        let endpoint = Endpoint::new("openai", "acct-1", "https://api.openai.com");
        let resp = executor
            .execute(CancellationToken::new(), test_request(endpoint.clone()))
            .await
            .expect("request succeeds");
        assert_eq!(resp.status, 200);
        assert_eq!(executor.metrics.total_requests(), 1);
        assert!(executor.endpoints.allow(&endpoint));
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_then_succeed() {
        let executor = test_executor(FailsNTimesThenOk { remaining_failures: AtomicU32::new(2) });
        let scheduler_clone = executor.scheduler.clone();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move { scheduler_clone.run(rx).await });

        let endpoint = Endpoint::new("openai", "acct-1", "https://api.openai.com");
        let resp = executor
            .execute(CancellationToken::new(), test_request(endpoint))
            .await
            .expect("eventually succeeds");
        assert_eq!(resp.status, 200);
    }

    #[tokio::test]
    async fn fatal_status_is_surfaced_without_tripping_breaker() {
        let executor = test_executor(AlwaysFatal);
        let scheduler_clone = executor.scheduler.clone();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move { scheduler_clone.run(rx).await });

        let endpoint = Endpoint::new("openai", "acct-1", "https://api.openai.com");
        let err = executor
            .execute(CancellationToken::new(), test_request(endpoint.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UpstreamFatal { status: 400, .. }));
        assert!(executor.endpoints.allow(&endpoint), "a fatal 4xx must not trip the breaker");
    }

    #[tokio::test]
    async fn no_available_endpoint_surfaces_circuit_open() {
        let executor = test_executor(AlwaysOk);
        let mut req = test_request(Endpoint::new("openai", "acct-1", "https://api.openai.com"));
        req.endpoints.clear();

        let err = executor.execute(CancellationToken::new(), req).await.unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn from_config_wires_scheduler_queue_size_into_the_running_scheduler() {
        let mut config = crate::config::GatewayConfig::default();
        config.scheduler.max_queue_size = 1;
        config.retry.max_retries = 0;

        let executor: Executor<AlwaysOk, NoStreams, MemorySink> =
            Executor::from_config(&config, MemorySink::new(), Arc::new(AlwaysOk), Arc::new(NoStreams));

        // no dispatcher running, so the first request stays queued and the
        // second must be rejected once `max_queue_size` (1) is reached.
        let scheduler = executor.scheduler.clone();
        tokio::spawn(async move {
            let _ = scheduler.schedule("key-a", 1).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = executor.scheduler.schedule("key-a", 1).await;
        assert!(matches!(result, Err(crate::scheduler::ScheduleError::QueueFull { capacity: 1, .. })));
    }

    #[tokio::test]
    async fn second_caller_for_the_same_stream_joins_instead_of_duplicating() {
        let executor = test_executor(AlwaysOk);
        let scheduler_clone = executor.scheduler.clone();
        let (_tx, rx) = tokio::sync::watch::channel(false);
        tokio::spawn(async move { scheduler_clone.run(rx).await });

        let endpoint = Endpoint::new("openai", "acct-1", "https://api.openai.com");
        let req = test_request(endpoint);

        let mut first_rx = executor.execute_stream(CancellationToken::new(), req.clone()).await;
        let mut second_rx = executor.execute_stream(CancellationToken::new(), req).await;

        let first_chunk = first_rx.recv().await.expect("first subscriber gets a chunk");
        let second_chunk = second_rx.recv().await.expect("second subscriber gets the same chunk");
        assert_eq!(first_chunk.data, second_chunk.data);
        assert_eq!(executor.fanout.len(), 1, "both callers shared one stream");
    }
}
