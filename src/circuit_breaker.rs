//! Circuit breaker implementation with lock-free atomics

use crate::clock::{Clock, MonotonicClock};
use crate::ResilienceError;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const STATE_CLOSED: u8 = 0;
const STATE_OPEN: u8 = 1;
const STATE_HALF_OPEN: u8 = 2;

/// Errors raised while constructing a circuit breaker.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CircuitBreakerError {
    #[error("failure_threshold must be greater than zero")]
    ZeroThreshold,
    #[error("half_open_max_calls must be greater than zero")]
    ZeroHalfOpenLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: usize,
    pub recovery_timeout: Duration,
    pub half_open_max_calls: usize,
}

impl CircuitBreakerConfig {
    pub fn disabled() -> Self {
        Self {
            failure_threshold: usize::MAX,
            recovery_timeout: Duration::from_secs(0),
            half_open_max_calls: usize::MAX,
        }
    }

    pub fn validate(&self) -> Result<(), CircuitBreakerError> {
        if self.failure_threshold == 0 {
            return Err(CircuitBreakerError::ZeroThreshold);
        }
        if self.half_open_max_calls == 0 {
            return Err(CircuitBreakerError::ZeroHalfOpenLimit);
        }
        Ok(())
    }
}

/// Atomic state machine shared between a [`CircuitBreakerPolicy`] and, for
/// per-endpoint breakers, an `EndpointSet` registry entry.
pub(crate) struct CircuitBreakerState {
    state: AtomicU8,
    failure_count: AtomicUsize,
    opened_at_millis: AtomicU64,
    half_open_calls: AtomicUsize,
}

impl CircuitBreakerState {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_CLOSED),
            failure_count: AtomicUsize::new(0),
            opened_at_millis: AtomicU64::new(0),
            half_open_calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn reset(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
        self.failure_count.store(0, Ordering::Release);
        self.opened_at_millis.store(0, Ordering::Release);
        self.half_open_calls.store(0, Ordering::Release);
    }

    pub(crate) fn current_state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            STATE_CLOSED => CircuitState::Closed,
            STATE_OPEN => CircuitState::Open,
            STATE_HALF_OPEN => CircuitState::HalfOpen,
            _ => unreachable!("invalid circuit breaker state"),
        }
    }
}

#[derive(Clone)]
pub struct CircuitBreakerPolicy {
    state: Arc<CircuitBreakerState>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreakerPolicy {
    pub fn new(failure_threshold: usize, recovery_timeout: Duration) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState::new()),
            config: CircuitBreakerConfig {
                failure_threshold,
                recovery_timeout,
                half_open_max_calls: 1,
            },
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    pub fn with_config(config: CircuitBreakerConfig) -> Self {
        Self {
            state: Arc::new(CircuitBreakerState::new()),
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Validating constructor; rejects a zero threshold or zero half-open limit.
    pub fn try_with_config(config: CircuitBreakerConfig) -> Result<Self, CircuitBreakerError> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    /// Build directly from a shared state handle, used by `EndpointSet` so every
    /// endpoint's breaker can be driven through the same atomic registry entry.
    pub(crate) fn from_shared(state: Arc<CircuitBreakerState>, config: CircuitBreakerConfig) -> Self {
        Self {
            state,
            config,
            clock: Arc::new(MonotonicClock::default()),
        }
    }

    /// Override the clock (useful for deterministic tests)
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_half_open_limit(mut self, limit: usize) -> Self {
        self.config.half_open_max_calls = limit;
        self
    }

    /// Current observed state, for diagnostics and tests.
    pub fn state(&self) -> CircuitState {
        self.state.current_state()
    }

    /// Force the breaker back to `Closed`, clearing counters.
    pub fn reset(&self) {
        self.state.reset();
    }

    /// Ask whether a call may proceed right now, performing any due
    /// `Open` → `HalfOpen` transition. Every call that returns `true` must be
    /// followed by exactly one of [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn allow(&self) -> bool {
        loop {
            let current_state = self.state.state.load(Ordering::Acquire);

            match current_state {
                STATE_OPEN => {
                    let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
                    let now = self.now_millis();
                    let elapsed = now.saturating_sub(opened_at);

                    if elapsed >= self.config.recovery_timeout.as_millis() as u64 {
                        match self.state.state.compare_exchange(
                            STATE_OPEN,
                            STATE_HALF_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        ) {
                            Ok(_) => {
                                tracing::info!("Circuit breaker → half-open");
                                self.state.half_open_calls.store(1, Ordering::Release);
                                return true;
                            }
                            Err(STATE_HALF_OPEN) => continue,
                            Err(STATE_CLOSED) => return true,
                            Err(_) => unreachable!("Invalid state transition"),
                        }
                    } else {
                        return false;
                    }
                }
                STATE_HALF_OPEN => {
                    let current = self.state.half_open_calls.fetch_add(1, Ordering::AcqRel);
                    if current >= self.config.half_open_max_calls {
                        self.state.half_open_calls.fetch_sub(1, Ordering::Release);
                        return false;
                    }
                    tracing::debug!(
                        in_flight = current + 1,
                        max = self.config.half_open_max_calls,
                        "Circuit breaker: half-open test request"
                    );
                    return true;
                }
                STATE_CLOSED => return true,
                _ => unreachable!("Invalid circuit breaker state"),
            }
        }
    }

    /// Record a successful call admitted by [`allow`](Self::allow).
    pub fn record_success(&self) {
        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }
        self.on_success();
    }

    /// Record a failed call admitted by [`allow`](Self::allow).
    pub fn record_failure(&self) {
        let was_half_open = self.state.state.load(Ordering::Acquire) == STATE_HALF_OPEN;
        if was_half_open {
            self.state.half_open_calls.fetch_sub(1, Ordering::Release);
        }
        self.on_failure();
    }

    pub async fn execute<T, E, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        if !self.allow() {
            let opened_at = self.state.opened_at_millis.load(Ordering::Acquire);
            let elapsed = self.now_millis().saturating_sub(opened_at);
            return Err(ResilienceError::CircuitOpen {
                failure_count: self.state.failure_count.load(Ordering::Acquire),
                open_duration: Duration::from_millis(elapsed),
            });
        }

        let result = operation().await;

        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }

        result
    }

    fn on_success(&self) {
        let current = self.state.state.load(Ordering::Acquire);

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_CLOSED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.state.failure_count.store(0, Ordering::Release);
                    self.state.opened_at_millis.store(0, Ordering::Release);
                    tracing::info!("Circuit breaker → closed");
                }
            }
            STATE_CLOSED => {
                self.state.failure_count.store(0, Ordering::Release);
            }
            _ => {}
        }
    }

    fn on_failure(&self) {
        let current = self.state.state.load(Ordering::Acquire);
        let failures = self.state.failure_count.fetch_add(1, Ordering::AcqRel) + 1;

        match current {
            STATE_HALF_OPEN => {
                if self
                    .state
                    .state
                    .compare_exchange(
                        STATE_HALF_OPEN,
                        STATE_OPEN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok()
                {
                    self.state
                        .opened_at_millis
                        .store(self.now_millis(), Ordering::Release);
                    tracing::warn!(failures, "Circuit breaker: test failed → open");
                }
            }
            STATE_CLOSED => {
                if failures >= self.config.failure_threshold {
                    if self
                        .state
                        .state
                        .compare_exchange(
                            STATE_CLOSED,
                            STATE_OPEN,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        self.state
                            .opened_at_millis
                            .store(self.now_millis(), Ordering::Release);
                        tracing::error!(
                            failures,
                            threshold = self.config.failure_threshold,
                            "Circuit breaker → open"
                        );
                    }
                }
            }
            _ => {}
        }
    }

    fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}
