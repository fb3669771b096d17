//! Historical throughput metrics kept in bounded, fixed-size ring buffers —
//! grounded on the same sealed-bucket-per-tick approach real LLM gateway
//! telemetry modules use to derive per-second/minute/hour/day rates without
//! unbounded memory growth.

mod historical;
mod store;

pub use historical::{HistoricalMetrics, MetricBucket, ModelStats, SealedBuckets};
pub use store::{Granularity, MetricsStore, NullMetricsStore};

/// Fixed-capacity ring buffer: pushing past capacity silently drops the
/// oldest entry. Used for each of the four granularities `HistoricalMetrics`
/// tracks.
pub(crate) struct RingBuffer<T> {
    items: std::collections::VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, item: T) {
        if self.items.len() >= self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }
}
