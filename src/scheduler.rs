//! Weighted fair queueing across per-API-key request queues.
//!
//! Grounded on the same building blocks the rest of the crate already uses
//! for concurrency control and timing — a `tokio::sync::Semaphore` gates
//! concurrent dispatch the way [`crate::bulkhead::BulkheadPolicy`] gates
//! generic operations (a plain semaphore rather than the bulkhead's
//! reject-on-full policy, since a scheduler queues instead of rejecting), and
//! [`crate::timeout::TimeoutPolicy`] bounds how long a request may wait for
//! its turn.
//!
//! Each API key gets its own FIFO queue, its own virtual clock, and its own
//! queue-depth cap. A request's `virtual_finish = max(queue.virtual_time,
//! global_virtual_time) + tokens * TOKEN_VIRTUAL_COST / weight`; the
//! scheduler always dispatches the queued request with the smallest
//! `virtual_finish` across all non-empty queues, which is what gives every
//! key a dispatch share proportional to its weight regardless of how bursty
//! any other key is.

use crate::timeout::TimeoutPolicy;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Virtual-time cost of a single token. Requests with a higher estimated
/// token cost accumulate virtual time faster and so yield the floor sooner to
/// other keys, the same way a larger packet yields a network link sooner
/// under byte-weighted fair queueing.
pub const TOKEN_VIRTUAL_COST: u64 = 1000;

/// Default fair-share weight for an API key that hasn't been explicitly
/// weighted. A key with double the default weight earns roughly double the
/// dispatch share of one at the default.
pub const DEFAULT_WEIGHT: u32 = 100;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(10);
const DURATION_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub max_concurrent: usize,
    pub queue_timeout: Duration,
    /// Per-API-key queue depth cap; exceeding it rejects with
    /// [`ScheduleError::QueueFull`] rather than growing unbounded.
    pub max_queue_size: usize,
    /// Fair-share weight assumed for an API key until [`FairScheduler::set_weight`]
    /// overrides it.
    pub default_weight: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 64,
            queue_timeout: Duration::from_secs(30),
            max_queue_size: 1000,
            default_weight: DEFAULT_WEIGHT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("scheduler queue is full ({depth}/{capacity})")]
    QueueFull { depth: usize, capacity: usize },
    #[error("timed out waiting {waited:?} for a dispatch slot")]
    Timeout { waited: Duration },
    #[error("request was cancelled before it was dispatched")]
    Cancelled,
}

struct QueuedRequest {
    id: u64,
    virtual_finish: u64,
    notify: oneshot::Sender<()>,
}

struct KeyQueue {
    virtual_time: u64,
    requests: VecDeque<QueuedRequest>,
}

struct SchedulerState {
    queues: HashMap<String, KeyQueue>,
    weights: HashMap<String, u32>,
    next_id: u64,
}

/// A handle for a request waiting for (or holding) its dispatch slot.
/// Dropping it releases the concurrency permit.
pub struct DispatchTicket {
    _permit: tokio::sync::OwnedSemaphorePermit,
    dispatched_at: Instant,
}

impl DispatchTicket {
    pub fn dispatched_at(&self) -> Instant {
        self.dispatched_at
    }
}

/// Weighted fair queueing scheduler. Cheap to clone; every clone shares the
/// same queues, concurrency gate and execution-time history.
#[derive(Clone)]
pub struct FairScheduler {
    config: SchedulerConfig,
    state: Arc<Mutex<SchedulerState>>,
    global_virtual_time: Arc<AtomicU64>,
    semaphore: Arc<Semaphore>,
    timeout: Arc<TimeoutPolicy>,
    durations: Arc<std::sync::Mutex<VecDeque<Duration>>>,
}

impl FairScheduler {
    /// Build a scheduler from a single config: `max_queue_size` bounds each
    /// API key's own queue depth, `default_weight` is the fair-share weight
    /// assumed until [`Self::set_weight`] overrides it for a key.
    pub fn new(config: SchedulerConfig) -> Self {
        let timeout = TimeoutPolicy::new(config.queue_timeout)
            .unwrap_or_else(|_| TimeoutPolicy::new(Duration::from_secs(1)).expect("1s is valid"));
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            timeout: Arc::new(timeout),
            config,
            state: Arc::new(Mutex::new(SchedulerState {
                queues: HashMap::new(),
                weights: HashMap::new(),
                next_id: 0,
            })),
            global_virtual_time: Arc::new(AtomicU64::new(0)),
            durations: Arc::new(std::sync::Mutex::new(VecDeque::with_capacity(
                DURATION_HISTORY_CAPACITY,
            ))),
        }
    }

    /// Set `api_key`'s fair-share weight. Higher weight means a larger share
    /// of dispatch throughput relative to other keys; takes effect on the
    /// next call to [`Self::schedule`] for that key.
    pub async fn set_weight(&self, api_key: &str, weight: u32) {
        let mut state = self.state.lock().await;
        state.weights.insert(api_key.to_string(), weight.max(1));
    }

    /// Enqueue a request costing `tokens` under `api_key`'s fair share, and
    /// wait for a dispatch slot. Returns a [`DispatchTicket`] once both this
    /// request is at the head of the fair-queueing order and a concurrency
    /// permit is free.
    ///
    /// The queue-depth cap in `config.max_queue_size` applies per API key,
    /// not globally: one bursty key filling its own queue must not reject
    /// requests from any other key.
    pub async fn schedule(
        &self,
        api_key: &str,
        tokens: u64,
    ) -> Result<DispatchTicket, ScheduleError> {
        self.schedule_cancellable(api_key, tokens, &CancellationToken::new()).await
    }

    /// Like [`Self::schedule`], but also races the wait against `ctx`. If
    /// `ctx` cancels before dispatch, the queued request is removed in place
    /// from its key's queue (O(queue length)) rather than left to be popped
    /// and silently dropped by the dispatcher later — a cancelled request
    /// must not keep counting against its own queue's depth cap.
    pub async fn schedule_cancellable(
        &self,
        api_key: &str,
        tokens: u64,
        ctx: &CancellationToken,
    ) -> Result<DispatchTicket, ScheduleError> {
        let (tx, rx) = oneshot::channel();
        let id;
        {
            let mut state = self.state.lock().await;
            let depth = state.queues.get(api_key).map(|q| q.requests.len()).unwrap_or(0);
            if depth >= self.config.max_queue_size {
                return Err(ScheduleError::QueueFull {
                    depth,
                    capacity: self.config.max_queue_size,
                });
            }

            let weight =
                *state.weights.get(api_key).unwrap_or(&self.config.default_weight) as u64;
            let global = self.global_virtual_time.load(Ordering::Acquire);
            let queue = state.queues.entry(api_key.to_string()).or_insert_with(|| KeyQueue {
                virtual_time: global,
                requests: VecDeque::new(),
            });
            let virtual_start = queue.virtual_time.max(global);
            let virtual_finish = virtual_start + (tokens.max(1) * TOKEN_VIRTUAL_COST) / weight;

            id = state.next_id;
            state.next_id += 1;
            state
                .queues
                .get_mut(api_key)
                .expect("just inserted")
                .requests
                .push_back(QueuedRequest {
                    id,
                    virtual_finish,
                    notify: tx,
                });
        }

        let wait_start = Instant::now();
        let wait_result = tokio::select! {
            result = tokio::time::timeout(self.config.queue_timeout, rx) => result,
            _ = ctx.cancelled() => {
                self.remove_queued(api_key, id).await;
                return Err(ScheduleError::Cancelled);
            }
        };
        match wait_result {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(ScheduleError::Cancelled),
            Err(_) => {
                self.remove_queued(api_key, id).await;
                return Err(ScheduleError::Timeout {
                    waited: wait_start.elapsed(),
                });
            }
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");

        Ok(DispatchTicket {
            _permit: permit,
            dispatched_at: Instant::now(),
        })
    }

    /// Remove a still-queued request by id, if the dispatcher hasn't already
    /// popped it. A no-op if it was dispatched in the race window between
    /// the timeout/cancel firing and this call acquiring the lock — in that
    /// case the caller already lost the race and its `rx` will resolve
    /// `Ok(())`, but having already returned `Cancelled`/`Timeout` to the
    /// caller the dispatched slot is simply never claimed.
    async fn remove_queued(&self, api_key: &str, id: u64) {
        let mut state = self.state.lock().await;
        if let Some(queue) = state.queues.get_mut(api_key) {
            queue.requests.retain(|r| r.id != id);
        }
    }

    /// Run the dispatch loop until `shutdown` resolves. Intended to be
    /// spawned once per `FairScheduler` instance.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            if !self.dispatch_next().await {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL_INTERVAL) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }

    /// Pop and notify the globally-next request by `virtual_finish`, if any
    /// is queued. Returns whether a request was dispatched.
    async fn dispatch_next(&self) -> bool {
        let mut state = self.state.lock().await;
        let next_key = state
            .queues
            .iter()
            .filter(|(_, q)| !q.requests.is_empty())
            .min_by_key(|(_, q)| q.requests.front().map(|r| r.virtual_finish).unwrap_or(u64::MAX))
            .map(|(key, _)| key.clone());

        let Some(key) = next_key else {
            return false;
        };

        let queue = state.queues.get_mut(&key).expect("key exists");
        let request = queue.requests.pop_front().expect("non-empty");
        queue.virtual_time = queue.virtual_time.max(request.virtual_finish);
        self.global_virtual_time
            .fetch_max(request.virtual_finish, Ordering::AcqRel);
        let _ = request.notify.send(());
        true
    }

    /// Record how long a dispatched request actually took to execute, for
    /// `stats()` consumers (rolling window of the most recent
    /// `DURATION_HISTORY_CAPACITY` samples).
    pub fn record_duration(&self, duration: Duration) {
        let mut history = self.durations.lock().expect("duration history poisoned");
        if history.len() >= DURATION_HISTORY_CAPACITY {
            history.pop_front();
        }
        history.push_back(duration);
    }

    pub fn recent_durations(&self) -> Vec<Duration> {
        self.durations
            .lock()
            .expect("duration history poisoned")
            .iter()
            .copied()
            .collect()
    }

    /// Total requests currently queued across every key.
    pub async fn queue_depth(&self) -> usize {
        self.state
            .lock()
            .await
            .queues
            .values()
            .map(|q| q.requests.len())
            .sum()
    }
}
