//! Retry policy implementation
//!
//! Provides configurable retry with backoff and jitter, plus retry predicate and pluggable sleeper.

use crate::error::MAX_RETRY_FAILURES;
use crate::{Backoff, Jitter, ResilienceError, Sleeper, TokioSleeper};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct RetryPolicy<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

impl<E> std::fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("sleeper", &"<sleeper>")
            .finish()
    }
}

impl<E> RetryPolicy<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn builder() -> RetryPolicyBuilder<E> {
        RetryPolicyBuilder::new()
    }

    pub async fn execute<T, Fut, Op>(&self, mut operation: Op) -> Result<T, ResilienceError<E>>
    where
        T: Send,
        Fut: Future<Output = Result<T, ResilienceError<E>>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let mut failures = Vec::new();

        for attempt in 0..self.max_attempts {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(ResilienceError::Inner(e)) => {
                    // Check if we should retry this error
                    if !(self.should_retry)(&e) {
                        return Err(ResilienceError::Inner(e));
                    }

                    failures.push(e);
                    if failures.len() > MAX_RETRY_FAILURES {
                        let excess = failures.len() - MAX_RETRY_FAILURES;
                        failures.drain(0..excess);
                    }

                    if failures.len() > MAX_RETRY_FAILURES {
                        let excess = failures.len() - MAX_RETRY_FAILURES;
                        failures.drain(0..excess);
                    }

                    // If this was the last attempt, return RetryExhausted
                    if attempt + 1 >= self.max_attempts {
                        return Err(ResilienceError::RetryExhausted {
                            attempts: self.max_attempts,
                            failures,
                        });
                    }

                    // Calculate backoff delay (backoff.delay is 1-indexed)
                    let mut delay = self.backoff.delay(attempt + 1);

                    // Apply jitter
                    delay = self.jitter.apply(delay);

                    // Sleep before next attempt
                    self.sleeper.sleep(delay).await;
                }
                // Non-Inner errors (Timeout, Bulkhead, CircuitOpen) are not retried
                Err(e) => return Err(e),
            }
        }

        // Should be unreachable due to loop logic, but satisfy compiler
        unreachable!("Retry loop should have returned or errored")
    }
}

pub struct RetryPolicyBuilder<E> {
    max_attempts: usize,
    backoff: Backoff,
    jitter: Jitter,
    should_retry: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    sleeper: Arc<dyn Sleeper>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    InvalidMaxAttempts(usize),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::InvalidMaxAttempts(n) => {
                write!(f, "max_attempts must be > 0 (got {})", n)
            }
        }
    }
}

impl std::error::Error for BuildError {}

impl<E> RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            max_attempts: 3,
            backoff: Backoff::exponential(Duration::from_secs(1)),
            jitter: Jitter::full(),
            should_retry: Arc::new(|_| true),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn max_attempts(mut self, attempts: usize) -> Result<Self, BuildError> {
        if attempts == 0 {
            return Err(BuildError::InvalidMaxAttempts(attempts));
        }
        self.max_attempts = attempts;
        Ok(self)
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn should_retry<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(predicate);
        self
    }

    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> RetryPolicy<E> {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: self.backoff,
            jitter: self.jitter,
            should_retry: self.should_retry,
            sleeper: self.sleeper,
        }
    }
}

impl<E> Default for RetryPolicyBuilder<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}


/// HTTP status codes a gateway request is safe to retry against a fresh
/// endpoint attempt: rate limiting and upstream unavailability, not client
/// or authorization errors.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Configuration for [`RetryEngine`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.25,
        }
    }
}

/// Outcome of a single attempt, as reported by the caller's operation.
/// Distinguishes a successful response from a retryable upstream failure
/// (with its status and an optional server-advised delay) from a fatal one
/// that must not be retried.
pub enum AttemptOutcome<T, F> {
    Success(T),
    Retryable { status: u16, retry_after: Option<Duration>, error: F },
    Fatal(F),
}

/// The failure side of [`RetryEngine::run`]: either the loop ran at least
/// once and exhausted/failed fatally, or the cancellation token fired before
/// any attempt was made.
#[derive(Debug, Clone)]
pub enum RetryOutcome<F> {
    Failed(F),
    Cancelled,
}

/// Drives the provider-facing retry loop: honors server-advised delays,
/// retries only the status codes [`is_retryable_status`] allows, and applies
/// jittered exponential backoff via [`crate::backoff::calculate_retry_delay`]
/// between attempts. Cancellation-aware: a cancelled token aborts the loop
/// before the next sleep or attempt.
#[derive(Clone)]
pub struct RetryEngine {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Run `attempt_fn` up to `1 + max_retries` times. `attempt_fn` receives
    /// the 0-indexed attempt number. Returns the last fatal/exhausted error
    /// on failure, or [`RetryOutcome::Cancelled`] if `cancellation` fired
    /// before an attempt ran at all.
    pub async fn run<T, F, Fut, Op>(
        &self,
        cancellation: &tokio_util::sync::CancellationToken,
        mut attempt_fn: Op,
    ) -> Result<T, RetryOutcome<F>>
    where
        Fut: Future<Output = AttemptOutcome<T, F>>,
        Op: FnMut(usize) -> Fut,
    {
        let mut rng = rand::thread_rng();
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if cancellation.is_cancelled() {
                break;
            }
            match attempt_fn(attempt).await {
                AttemptOutcome::Success(value) => return Ok(value),
                AttemptOutcome::Fatal(error) => return Err(RetryOutcome::Failed(error)),
                AttemptOutcome::Retryable { retry_after, error, .. } => {
                    last_error = Some(error);
                    if attempt >= self.config.max_retries {
                        break;
                    }
                    let delay = crate::backoff::calculate_retry_delay(
                        attempt + 1,
                        retry_after,
                        self.config.base_delay,
                        self.config.max_delay,
                        self.config.multiplier,
                        self.config.jitter_factor,
                        &mut rng,
                    );
                    tokio::select! {
                        _ = self.sleeper.sleep(delay) => {}
                        _ = cancellation.cancelled() => break,
                    }
                }
            }
        }

        match last_error {
            Some(error) => Err(RetryOutcome::Failed(error)),
            None => Err(RetryOutcome::Cancelled),
        }
    }
}

#[cfg(test)]
mod retry_engine_tests {
    use super::*;
    use crate::InstantSleeper;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn retryable_statuses_match_gateway_taxonomy() {
        for status in [429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status));
        }
        for status in [200, 400, 401, 403, 404] {
            assert!(!is_retryable_status(status));
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry() {
        let engine = RetryEngine::new(RetryConfig::default()).with_sleeper(InstantSleeper);
        let token = tokio_util::sync::CancellationToken::new();
        let result: Result<u32, RetryOutcome<String>> = engine
            .run(&token, |_attempt| async { AttemptOutcome::Success(7) })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn fatal_error_is_not_retried() {
        let engine = RetryEngine::new(RetryConfig::default()).with_sleeper(InstantSleeper);
        let token = tokio_util::sync::CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: Result<u32, RetryOutcome<String>> = engine
            .run(&token, move |_attempt| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async { AttemptOutcome::Fatal("bad request".to_string()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retryable_error_exhausts_after_max_retries() {
        let config = RetryConfig {
            max_retries: 2,
            ..RetryConfig::default()
        };
        let engine = RetryEngine::new(config).with_sleeper(InstantSleeper);
        let token = tokio_util::sync::CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: Result<u32, RetryOutcome<String>> = engine
            .run(&token, move |_attempt| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async {
                    AttemptOutcome::Retryable {
                        status: 503,
                        retry_after: None,
                        error: "unavailable".to_string(),
                    }
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3, "initial attempt + 2 retries");
    }

    #[tokio::test]
    async fn cancellation_stops_the_loop() {
        let engine = RetryEngine::new(RetryConfig::default()).with_sleeper(InstantSleeper);
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let result: Result<u32, RetryOutcome<String>> = engine
            .run(&token, move |_attempt| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
                async {
                    AttemptOutcome::Retryable {
                        status: 503,
                        retry_after: None,
                        error: "unavailable".to_string(),
                    }
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0, "cancelled before first attempt");
    }
}
