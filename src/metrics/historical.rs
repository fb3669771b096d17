use super::store::{Granularity, MetricsStore};
use super::RingBuffer;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const SECOND_BUCKETS: usize = 60;
const MINUTE_BUCKETS: usize = 60;
const HOUR_BUCKETS: usize = 24;
const DAY_BUCKETS: usize = 30;
const TPS_WINDOW: usize = 10;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Per-model usage and latency observed in one sealed time bucket.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelStats {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    total_latency_ms: u64,
}

impl ModelStats {
    pub fn tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Request-weighted average latency; 0 if this bucket saw no requests.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.requests as f64
        }
    }

    fn merge(&mut self, other: &ModelStats) {
        self.requests += other.requests;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_latency_ms += other.total_latency_ms;
    }
}

/// Requests, tokens, and per-model breakdown observed in one sealed time
/// bucket. Aggregation across sub-buckets (seconds into a minute, minutes
/// into an hour, ...) is request-weighted for latency and additive for
/// everything else.
#[derive(Debug, Clone, Default)]
pub struct MetricBucket {
    pub requests: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    total_latency_ms: u64,
    pub by_model: HashMap<String, ModelStats>,
}

impl MetricBucket {
    pub fn tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Request-weighted average latency across the whole bucket; 0 if the
    /// bucket saw no requests.
    pub fn avg_latency_ms(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.requests as f64
        }
    }

    fn record_one(
        &mut self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        latency_ms: u64,
        success: bool,
    ) {
        self.requests += 1;
        if success {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.input_tokens += input_tokens;
        self.output_tokens += output_tokens;
        self.total_latency_ms += latency_ms;

        let entry = self.by_model.entry(model.to_string()).or_default();
        entry.requests += 1;
        entry.input_tokens += input_tokens;
        entry.output_tokens += output_tokens;
        entry.total_latency_ms += latency_ms;
    }

    fn merge(&mut self, other: MetricBucket) {
        self.requests += other.requests;
        self.success_count += other.success_count;
        self.failure_count += other.failure_count;
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.total_latency_ms += other.total_latency_ms;
        for (model, stats) in other.by_model {
            self.by_model.entry(model).or_default().merge(&stats);
        }
    }
}

/// Buckets sealed by one call to [`HistoricalMetrics::tick_sealed`]. Every
/// tick seals a second bucket; the coarser fields are populated only on
/// their own rollover boundary.
#[derive(Debug, Clone, Default)]
pub struct SealedBuckets {
    pub second: Option<MetricBucket>,
    pub minute: Option<MetricBucket>,
    pub hour: Option<MetricBucket>,
    pub day: Option<MetricBucket>,
}

struct GranularityRing {
    buckets: RingBuffer<MetricBucket>,
    accumulator: MetricBucket,
    ticks_per_bucket: u64,
    ticks_since_seal: u64,
}

impl GranularityRing {
    fn new(capacity: usize, ticks_per_bucket: u64) -> Self {
        Self {
            buckets: RingBuffer::new(capacity),
            accumulator: MetricBucket::default(),
            ticks_per_bucket,
            ticks_since_seal: 0,
        }
    }

    /// Fold in one tick's worth of data; seals and rotates the accumulator
    /// into the ring once `ticks_per_bucket` ticks have accumulated.
    fn tick(&mut self, bucket: MetricBucket) -> Option<MetricBucket> {
        self.accumulator.merge(bucket);
        self.ticks_since_seal += 1;
        if self.ticks_since_seal >= self.ticks_per_bucket {
            let sealed = std::mem::take(&mut self.accumulator);
            self.ticks_since_seal = 0;
            self.buckets.push(sealed.clone());
            Some(sealed)
        } else {
            None
        }
    }

    fn sum_tokens(&self) -> u64 {
        self.buckets.iter().map(|b| b.tokens()).sum()
    }

    /// Mean requests per sealed bucket over the last `window` buckets.
    /// Divides by `window` itself, not by how many buckets have sealed so
    /// far — seconds that have elapsed without sealing a bucket yet count as
    /// zero, exactly like seconds that sealed with no recorded requests.
    fn mean_requests(&self, window: usize) -> f64 {
        if window == 0 {
            return 0.0;
        }
        let total: u64 = self.buckets.iter().rev().take(window).map(|b| b.requests).sum();
        total as f64 / window as f64
    }

    fn snapshot(&self) -> Vec<MetricBucket> {
        self.buckets.iter().cloned().collect()
    }
}

/// Four ring buffers (second/minute/hour/day) fed by a single 1-second
/// ticker. Each granularity seals the prior level's accumulator on its own
/// cadence: every second, every 60 seconds, every 60 minutes, every 24
/// hours.
pub struct HistoricalMetrics {
    current_second: Mutex<MetricBucket>,
    seconds: Mutex<GranularityRing>,
    minutes: Mutex<GranularityRing>,
    hours: Mutex<GranularityRing>,
    days: Mutex<GranularityRing>,
}

impl Default for HistoricalMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoricalMetrics {
    pub fn new() -> Self {
        Self {
            current_second: Mutex::new(MetricBucket::default()),
            seconds: Mutex::new(GranularityRing::new(SECOND_BUCKETS, 1)),
            minutes: Mutex::new(GranularityRing::new(MINUTE_BUCKETS, 60)),
            hours: Mutex::new(GranularityRing::new(HOUR_BUCKETS, 60)),
            days: Mutex::new(GranularityRing::new(DAY_BUCKETS, 24)),
        }
    }

    /// Record one completed request into the current second's accumulator.
    pub fn record(
        &self,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
        latency_ms: u64,
        success: bool,
    ) {
        let mut current = self.current_second.lock().expect("metrics poisoned");
        current.record_one(model, input_tokens, output_tokens, latency_ms, success);
    }

    /// Seal the current second and cascade it through every granularity.
    /// Intended to be driven once per second by a background ticker; exactly
    /// one should run per process.
    pub fn tick(&self) {
        self.tick_sealed();
    }

    /// Same as [`Self::tick`], but returns every bucket that sealed this
    /// tick (a plain per-second tick always seals a second bucket; minute,
    /// hour and day buckets only seal on their own boundary). Used by
    /// [`Self::run_ticker_with_store`] to forward sealed buckets to an
    /// external [`MetricsStore`] without re-deriving which granularities
    /// just rolled over.
    pub fn tick_sealed(&self) -> SealedBuckets {
        let sealed = {
            let mut current = self.current_second.lock().expect("metrics poisoned");
            std::mem::take(&mut *current)
        };

        let mut out = SealedBuckets::default();
        out.second = Some(sealed.clone());
        let from_seconds = self.seconds.lock().expect("metrics poisoned").tick(sealed);
        if let Some(minute_bucket) = from_seconds {
            out.minute = Some(minute_bucket.clone());
            let from_minutes =
                self.minutes.lock().expect("metrics poisoned").tick(minute_bucket);
            if let Some(hour_bucket) = from_minutes {
                out.hour = Some(hour_bucket.clone());
                let from_hours =
                    self.hours.lock().expect("metrics poisoned").tick(hour_bucket);
                if let Some(day_bucket) = from_hours {
                    out.day = Some(day_bucket.clone());
                    self.days.lock().expect("metrics poisoned").tick(day_bucket);
                }
            }
        }
        out
    }

    pub async fn run_ticker(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => self.tick(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Same loop as [`Self::run_ticker`], but forwards every sealed bucket
    /// to `store`. The store is opaque — a no-op [`super::NullMetricsStore`]
    /// by default — so the on-disk layout of a day-rollover persist stays
    /// external to this crate.
    pub async fn run_ticker_with_store(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
        store: Arc<dyn MetricsStore>,
    ) {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let sealed = self.tick_sealed();
                    if let Some(bucket) = &sealed.second {
                        store.record(bucket, Granularity::Second).await;
                    }
                    if let Some(bucket) = &sealed.minute {
                        store.record(bucket, Granularity::Minute).await;
                    }
                    if let Some(bucket) = &sealed.hour {
                        store.record(bucket, Granularity::Hour).await;
                    }
                    if let Some(bucket) = &sealed.day {
                        store.record(bucket, Granularity::Day).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Requests per second: mean of the last 10 sealed second-buckets'
    /// request counts.
    pub fn tps(&self) -> f64 {
        self.seconds.lock().expect("metrics poisoned").mean_requests(TPS_WINDOW)
    }

    /// Tokens per minute: sum of tokens across the second-ring, which holds
    /// the last 60 seconds of sealed buckets.
    pub fn tpm(&self) -> f64 {
        self.seconds.lock().expect("metrics poisoned").sum_tokens() as f64
    }

    /// Tokens per hour: sum of tokens across the minute-ring (last 60
    /// minutes).
    pub fn tph(&self) -> f64 {
        self.minutes.lock().expect("metrics poisoned").sum_tokens() as f64
    }

    /// Tokens per day: sum of tokens across the hour-ring (last 24 hours).
    pub fn tpd(&self) -> f64 {
        self.hours.lock().expect("metrics poisoned").sum_tokens() as f64
    }

    pub fn total_requests(&self) -> u64 {
        self.seconds.lock().expect("metrics poisoned").buckets.iter().map(|b| b.requests).sum()
    }

    pub fn total_tokens(&self) -> u64 {
        self.seconds.lock().expect("metrics poisoned").sum_tokens()
    }

    /// Ordered snapshot of sealed second-buckets, oldest first.
    pub fn second_buckets(&self) -> Vec<MetricBucket> {
        self.seconds.lock().expect("metrics poisoned").snapshot()
    }

    /// Ordered snapshot of sealed minute-buckets, oldest first.
    pub fn minute_buckets(&self) -> Vec<MetricBucket> {
        self.minutes.lock().expect("metrics poisoned").snapshot()
    }

    /// Ordered snapshot of sealed hour-buckets, oldest first.
    pub fn hour_buckets(&self) -> Vec<MetricBucket> {
        self.hours.lock().expect("metrics poisoned").snapshot()
    }

    /// Ordered snapshot of sealed day-buckets, oldest first.
    pub fn day_buckets(&self) -> Vec<MetricBucket> {
        self.days.lock().expect("metrics poisoned").snapshot()
    }
}
