//! Backoff strategies for retry policies

use std::time::Duration;

/// Backoff strategy for retries
#[derive(Debug, Clone)]
pub enum Backoff {
    /// Fixed delay between retries
    Constant { delay: Duration },
    /// Linearly increasing delay
    Linear { base: Duration },
    /// Exponentially increasing delay with optional cap
    Exponential { base: Duration, max: Option<Duration> },
}

impl Backoff {
    /// Create a constant backoff strategy
    pub fn constant(delay: Duration) -> Self {
        Backoff::Constant { delay }
    }

    /// Create a linear backoff strategy
    pub fn linear(base: Duration) -> Self {
        Backoff::Linear { base }
    }

    /// Create an exponential backoff strategy
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base, max: None }
    }

    /// Set a maximum delay for exponential backoff
    pub fn with_max(mut self, max: Duration) -> Self {
        if let Backoff::Exponential { max: ref mut m, .. } = self {
            *m = Some(max);
        }
        self
    }

    /// Calculate the delay for a given attempt number (1-indexed)
    pub fn delay(&self, attempt: usize) -> Duration {
        match self {
            Backoff::Constant { delay } => *delay,
            Backoff::Linear { base } => {
                // Use checked_mul to prevent overflow
                base.checked_mul(attempt as u32)
                    .unwrap_or(Duration::from_secs(u64::MAX))
            }
            Backoff::Exponential { base, max } => {
                // Calculate 2^(attempt-1) with overflow protection
                let exponent = (attempt.saturating_sub(1)) as u32;
                let multiplier = 2u32.saturating_pow(exponent);

                let exp_delay = base.checked_mul(multiplier)
                    .unwrap_or(Duration::from_secs(u64::MAX));

                if let Some(max) = max {
                    exp_delay.min(*max)
                } else {
                    exp_delay
                }
            }
        }
    }
}

/// Minimum delay the gateway retry engine will ever honor, regardless of
/// backoff math or server advice. Guards against a misconfigured provider
/// advertising a near-zero `Retry-After` and causing a hot retry loop.
pub const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Compute the delay before the next retry attempt.
///
/// `server_advised`, when present (parsed from a `Retry-After` header or
/// provider-specific equivalent), takes precedence over the exponential
/// backoff curve — providers know their own rate-limit windows better than
/// a client-side guess. Otherwise the nominal delay is `base_delay ×
/// multiplier^(attempt-1)`, capped at `max_delay`. Either way the result is
/// jittered multiplicatively by `±jitter_factor` and clamped to
/// `[MIN_RETRY_DELAY, max_delay]`.
///
/// `attempt` is 1-indexed, matching [`Backoff::delay`]. `multiplier` is the
/// gateway's configurable growth factor (default `2.0`) — unlike
/// [`Backoff::Exponential`], which only ever doubles, this lets a caller
/// tune the curve's steepness without changing `base_delay`.
pub fn calculate_retry_delay(
    attempt: usize,
    server_advised: Option<Duration>,
    base_delay: Duration,
    max_delay: Duration,
    multiplier: f64,
    jitter_factor: f64,
    rng: &mut impl rand::Rng,
) -> Duration {
    let nominal = server_advised.unwrap_or_else(|| {
        let exponent = attempt.saturating_sub(1) as i32;
        let scaled = base_delay.as_secs_f64() * multiplier.max(1.0).powi(exponent);
        Duration::from_secs_f64(scaled).min(max_delay)
    });

    let factor = if jitter_factor > 0.0 {
        1.0 + rng.gen_range(-jitter_factor..=jitter_factor)
    } else {
        1.0
    };
    let jittered_millis = (nominal.as_millis() as f64 * factor).max(0.0) as u64;
    Duration::from_millis(jittered_millis).clamp(MIN_RETRY_DELAY, max_delay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_backoff_returns_same_delay() {
        let backoff = Backoff::constant(Duration::from_secs(1));
        assert_eq!(backoff.delay(1), Duration::from_secs(1));
        assert_eq!(backoff.delay(2), Duration::from_secs(1));
        assert_eq!(backoff.delay(100), Duration::from_secs(1));
    }

    #[test]
    fn linear_backoff_increases_linearly() {
        let backoff = Backoff::linear(Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(300));
        assert_eq!(backoff.delay(10), Duration::from_millis(1000));
    }

    #[test]
    fn exponential_backoff_doubles_each_time() {
        let backoff = Backoff::exponential(Duration::from_millis(100));
        assert_eq!(backoff.delay(1), Duration::from_millis(100));  // 100 * 2^0
        assert_eq!(backoff.delay(2), Duration::from_millis(200));  // 100 * 2^1
        assert_eq!(backoff.delay(3), Duration::from_millis(400));  // 100 * 2^2
        assert_eq!(backoff.delay(4), Duration::from_millis(800));  // 100 * 2^3
        assert_eq!(backoff.delay(5), Duration::from_millis(1600)); // 100 * 2^4
    }

    #[test]
    fn exponential_backoff_respects_max() {
        let backoff = Backoff::exponential(Duration::from_millis(100))
            .with_max(Duration::from_secs(1));

        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(3), Duration::from_millis(400));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1)); // Capped
        assert_eq!(backoff.delay(10), Duration::from_secs(1)); // Still capped
    }

    #[test]
    fn exponential_backoff_handles_overflow() {
        let backoff = Backoff::exponential(Duration::from_secs(1));
        // Attempt 64 would overflow u32, should saturate
        let delay = backoff.delay(64);
        assert!(delay > Duration::from_secs(1_000_000)); // Very large but not panicking
    }

    #[test]
    fn linear_backoff_handles_overflow() {
        let backoff = Backoff::linear(Duration::from_secs(u64::MAX / 2));
        // Should saturate to max duration instead of panicking
        let delay = backoff.delay(10);
        assert!(delay >= Duration::from_secs(u64::MAX / 2));
    }

    #[test]
    fn server_advised_delay_takes_precedence_over_computed_backoff() {
        let mut rng = rand::thread_rng();
        // base_delay is tiny; if the server's advice weren't honored the
        // result would be nowhere near 3s.
        let delay = calculate_retry_delay(
            1,
            Some(Duration::from_secs(3)),
            Duration::from_millis(100),
            Duration::from_secs(60),
            2.0,
            0.25,
            &mut rng,
        );
        let lower = Duration::from_millis((3_000.0 * 0.75) as u64);
        let upper = Duration::from_millis((3_000.0 * 1.25) as u64);
        assert!(delay >= lower && delay <= upper, "{delay:?} not within jittered 3s window");
    }

    #[test]
    fn delay_never_drops_below_the_minimum_floor() {
        let mut rng = rand::thread_rng();
        // A near-zero server advisory must still clamp up to MIN_RETRY_DELAY.
        let delay = calculate_retry_delay(
            1,
            Some(Duration::from_millis(1)),
            Duration::from_secs(2),
            Duration::from_secs(60),
            2.0,
            0.25,
            &mut rng,
        );
        assert!(delay >= MIN_RETRY_DELAY);
    }

    #[test]
    fn jittered_delay_stays_within_the_documented_bound() {
        let mut rng = rand::thread_rng();
        let max_delay = Duration::from_secs(60);
        for attempt in 0..20 {
            let delay = calculate_retry_delay(
                attempt,
                None,
                Duration::from_secs(2),
                max_delay,
                2.0,
                0.25,
                &mut rng,
            );
            let upper = Duration::from_millis((max_delay.as_millis() as f64 * 1.25) as u64);
            assert!(delay >= MIN_RETRY_DELAY, "attempt {attempt}: {delay:?} below floor");
            assert!(delay <= upper, "attempt {attempt}: {delay:?} above {upper:?}");
        }
    }

    #[test]
    fn unjittered_mean_delay_is_monotonic_until_capped() {
        // With jitter disabled, the nominal (mean) delay must never decrease
        // between attempts until it saturates at max_delay.
        let mut rng = rand::thread_rng();
        let max_delay = Duration::from_secs(10);
        let mut previous = Duration::from_millis(0);
        for attempt in 1..10 {
            let delay = calculate_retry_delay(
                attempt,
                None,
                Duration::from_millis(100),
                max_delay,
                2.0,
                0.0,
                &mut rng,
            );
            assert!(delay >= previous, "attempt {attempt} regressed: {delay:?} < {previous:?}");
            previous = delay;
        }
    }

    #[test]
    fn configurable_multiplier_changes_the_growth_rate() {
        let mut rng = rand::thread_rng();
        let max_delay = Duration::from_secs(60);
        // multiplier=3.0: attempt 3's nominal delay is base * 3^2 = 900ms,
        // well above what a multiplier=2.0 curve (400ms) would produce.
        let delay = calculate_retry_delay(
            3,
            None,
            Duration::from_millis(100),
            max_delay,
            3.0,
            0.0,
            &mut rng,
        );
        assert_eq!(delay, Duration::from_millis(900));
    }

    #[test]
    fn with_max_only_affects_exponential() {
        let constant = Backoff::constant(Duration::from_secs(5))
            .with_max(Duration::from_secs(1));
        // Shouldn't affect constant backoff
        assert_eq!(constant.delay(1), Duration::from_secs(5));

        let linear = Backoff::linear(Duration::from_secs(5))
            .with_max(Duration::from_secs(1));
        // Shouldn't affect linear backoff
        assert_eq!(linear.delay(2), Duration::from_secs(10));
    }
}
