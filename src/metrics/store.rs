//! Pluggable external metrics export, mirroring the `TelemetrySink` seam:
//! the gateway always tracks [`super::HistoricalMetrics`] internally, and
//! optionally forwards each sealed bucket to an external store (e.g. the
//! `ninelives-prometheus` sink) through this trait.

use super::MetricBucket;
use async_trait::async_trait;

/// Which ring a sealed [`MetricBucket`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Granularity::Second => "second",
            Granularity::Minute => "minute",
            Granularity::Hour => "hour",
            Granularity::Day => "day",
        };
        write!(f, "{s}")
    }
}

#[async_trait]
pub trait MetricsStore: Send + Sync {
    async fn record(&self, bucket: &MetricBucket, granularity: Granularity);
}

/// A `MetricsStore` that discards everything — the default when no external
/// metrics backend is configured.
#[derive(Debug, Clone, Default)]
pub struct NullMetricsStore;

#[async_trait]
impl MetricsStore for NullMetricsStore {
    async fn record(&self, _bucket: &MetricBucket, _granularity: Granularity) {}
}
