//! Provider-keyed HTTP connection pooling.
//!
//! One `reqwest::Client` per (provider, base URL, proxy) tuple, each backed by
//! its own HTTP/2 connection pool. Built on [`crate::adaptive::Adaptive`] so a
//! full `Configure` call can swap in an entirely new client map without a lock
//! held across any in-flight request. [`crate::executor::Executor::reconfigure`]
//! drives this from a [`crate::config::GatewayConfig`] update.

use crate::adaptive::Adaptive;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub provider: String,
    pub base_url: String,
    pub proxy: Option<String>,
}

impl PoolKey {
    pub fn new(provider: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            base_url: base_url.into(),
            proxy: None,
        }
    }

    pub fn with_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.proxy = Some(proxy.into());
        self
    }
}

/// Per-pool tuning shared by every client the pool builds. `max_idle_conns`
/// caps total idle connections across all hosts a client sees;
/// `pool_max_idle_per_host` caps idle connections to any single host.
/// `reqwest` only exposes the latter directly, so `max_idle_conns` is kept
/// as a recorded setting for configuration parity and future transports.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    pub pool_idle_timeout: Duration,
    pub max_idle_conns: usize,
    pub pool_max_idle_per_host: usize,
    pub connect_timeout: Duration,
    /// Negotiate HTTP/2 over TLS ALPN when the upstream supports it.
    pub force_http2: bool,
    /// Minimum acceptable negotiated TLS version.
    pub min_tls_version: reqwest::tls::Version,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout: Duration::from_secs(90),
            max_idle_conns: 100,
            pool_max_idle_per_host: 100,
            connect_timeout: Duration::from_secs(10),
            force_http2: true,
            min_tls_version: reqwest::tls::Version::TLS_1_2,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("failed to build http client: {0}")]
    Build(#[from] reqwest::Error),
    #[error("unparseable proxy url for provider {provider}: {url}")]
    InvalidProxy { provider: String, url: String },
}

/// Lazily builds and caches one `reqwest::Client` per [`PoolKey`].
///
/// `config` is itself held in an [`Adaptive`] so [`Self::reconfigure`] can
/// swap in new transport tuning without invalidating `Arc<Client>` handles
/// already cloned out to in-flight requests.
pub struct ConnectionPool {
    config: Adaptive<PoolConfig>,
    clients: Adaptive<HashMap<PoolKey, Arc<reqwest::Client>>>,
}

impl ConnectionPool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config: Adaptive::new(config),
            clients: Adaptive::new(HashMap::new()),
        }
    }

    /// Return the client for `key`, building and caching one if this is the
    /// first use of that key.
    pub fn get_or_create(&self, key: &PoolKey) -> Result<Arc<reqwest::Client>, PoolError> {
        if let Some(client) = self.clients.get().get(key) {
            return Ok(client.clone());
        }

        let client = Arc::new(self.build_client(key)?);
        self.clients.update(|current| {
            let mut next = current.clone();
            next.entry(key.clone()).or_insert_with(|| client.clone());
            next
        });
        Ok(self.clients.get().get(key).expect("just inserted").clone())
    }

    fn build_client(&self, key: &PoolKey) -> Result<reqwest::Client, PoolError> {
        let config = self.config.get();
        // HTTP/2 negotiation over TLS is ALPN-driven and already on by
        // default; `force_http2` only matters for plaintext providers, where
        // `http2_prior_knowledge` skips the HTTP/1.1 upgrade dance.
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .connect_timeout(config.connect_timeout)
            .min_tls_version(config.min_tls_version);

        if config.force_http2 && key.base_url.starts_with("http://") {
            builder = builder.http2_prior_knowledge();
        }

        if let Some(proxy) = &key.proxy {
            // SOCKS5 and HTTP/HTTPS proxies both parse through `Proxy::all`;
            // `reqwest` dispatches on the URL scheme internally (`socks5://`
            // vs `http://`/`https://`).
            let built = reqwest::Proxy::all(proxy).map_err(|_| PoolError::InvalidProxy {
                provider: key.provider.clone(),
                url: proxy.clone(),
            })?;
            builder = builder.proxy(built);
        }

        builder.build().map_err(PoolError::Build)
    }

    /// Replace the entire pool's client map and tuning atomically. Existing
    /// clients already handed out to in-flight requests keep working; only
    /// new lookups observe the swap. Reconfiguring with an identical config
    /// is a no-op on externally observable behavior.
    pub fn reconfigure(&self, config: PoolConfig) {
        if *self.config.get() == config {
            return;
        }
        self.config.set(config);
        self.clients.set(HashMap::new());
    }

    pub fn config(&self) -> Arc<PoolConfig> {
        self.config.get()
    }

    pub fn len(&self) -> usize {
        self.clients.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
