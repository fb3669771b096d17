//! Gateway-wide configuration, grouping the six config tables each
//! subsystem exposes. Every group has a `Default` matching that subsystem's
//! documented default, and the whole thing is `serde`-(de)serializable so a
//! binary can load it from a config file without this crate knowing the
//! file format.
//!
//! [`crate::executor::Executor::from_config`] builds every subsystem from
//! one `GatewayConfig`; [`crate::executor::Executor::reconfigure`] swaps in
//! an updated one without invalidating in-flight requests, the same
//! copy-on-write discipline [`crate::pool::ConnectionPool`] already uses
//! internally via `Adaptive<T>`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// `httpPool` config group — see [`crate::pool::PoolConfig`], which this
/// converts into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpPoolConfig {
    pub max_idle_conns: usize,
    pub max_idle_conns_per_host: usize,
    pub max_conns_per_host: usize,
    pub idle_conn_timeout_seconds: u64,
    pub force_http2: bool,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_conns: 100,
            max_idle_conns_per_host: 100,
            max_conns_per_host: 100,
            idle_conn_timeout_seconds: 90,
            force_http2: true,
        }
    }
}

impl From<&HttpPoolConfig> for crate::pool::PoolConfig {
    fn from(cfg: &HttpPoolConfig) -> Self {
        Self {
            pool_idle_timeout: Duration::from_secs(cfg.idle_conn_timeout_seconds),
            max_idle_conns: cfg.max_idle_conns,
            pool_max_idle_per_host: cfg.max_idle_conns_per_host,
            connect_timeout: Duration::from_secs(10),
            force_http2: cfg.force_http2,
            min_tls_version: reqwest::tls::Version::TLS_1_2,
        }
    }
}

/// `circuitBreaker` config group — see [`crate::circuit_breaker::CircuitBreakerConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfigGroup {
    pub failure_threshold: usize,
    pub reset_timeout_seconds: u64,
    pub half_open_max: usize,
}

impl Default for CircuitBreakerConfigGroup {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_seconds: 30,
            half_open_max: 1,
        }
    }
}

impl From<&CircuitBreakerConfigGroup> for crate::circuit_breaker::CircuitBreakerConfig {
    fn from(cfg: &CircuitBreakerConfigGroup) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            recovery_timeout: Duration::from_secs(cfg.reset_timeout_seconds),
            half_open_max_calls: cfg.half_open_max,
        }
    }
}

/// `retry` config group — see [`crate::retry::RetryConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfigGroup {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_factor: f64,
    pub max_retries: usize,
}

impl Default for RetryConfigGroup {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2_000,
            max_delay_ms: 60_000,
            multiplier: 2.0,
            jitter_factor: 0.25,
            max_retries: 5,
        }
    }
}

impl From<&RetryConfigGroup> for crate::retry::RetryConfig {
    fn from(cfg: &RetryConfigGroup) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.initial_delay_ms),
            max_delay: Duration::from_millis(cfg.max_delay_ms),
            multiplier: cfg.multiplier,
            jitter_factor: cfg.jitter_factor,
        }
    }
}

/// `scheduler` config group — see [`crate::scheduler::SchedulerConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfigGroup {
    pub default_weight: u32,
    pub max_queue_size: usize,
    pub max_concurrent: usize,
    pub queue_timeout_seconds: u64,
    pub workers: usize,
}

impl Default for SchedulerConfigGroup {
    fn default() -> Self {
        Self {
            default_weight: crate::scheduler::DEFAULT_WEIGHT,
            max_queue_size: 1000,
            max_concurrent: 64,
            queue_timeout_seconds: 30,
            workers: 1,
        }
    }
}

impl From<&SchedulerConfigGroup> for crate::scheduler::SchedulerConfig {
    fn from(cfg: &SchedulerConfigGroup) -> Self {
        Self {
            max_concurrent: cfg.max_concurrent,
            queue_timeout: Duration::from_secs(cfg.queue_timeout_seconds),
            max_queue_size: cfg.max_queue_size,
            default_weight: cfg.default_weight,
        }
    }
}

/// `streamFanout` config group — see [`crate::fanout::StreamFanout`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamFanoutConfigGroup {
    pub enabled: bool,
    pub buffer_size: usize,
    pub dedup_window_seconds: u64,
}

impl Default for StreamFanoutConfigGroup {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 50,
            dedup_window_seconds: 5,
        }
    }
}

/// `metrics` config group. `histogram_buckets_ms` is handed to an external
/// exporter (e.g. `ninelives-prometheus`); this crate only carries the
/// values through.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfigGroup {
    pub histogram_buckets_ms: Vec<f64>,
    pub namespace: String,
    pub subsystem: String,
}

impl Default for MetricsConfigGroup {
    fn default() -> Self {
        Self {
            histogram_buckets_ms: vec![
                5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1_000.0, 2_500.0, 5_000.0, 10_000.0,
            ],
            namespace: "ninelives".to_string(),
            subsystem: "gateway".to_string(),
        }
    }
}

/// The complete configuration surface from spec §6, grouped exactly as that
/// table lists it. Every field has a default matching what §4 documents for
/// the corresponding component, so `GatewayConfig::default()` is a valid,
/// fully-specified configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub http_pool: HttpPoolConfig,
    pub circuit_breaker: CircuitBreakerConfigGroup,
    pub retry: RetryConfigGroup,
    pub scheduler: SchedulerConfigGroup,
    pub stream_fanout: StreamFanoutConfigGroup,
    pub metrics: MetricsConfigGroup,
}
