//! Endpoint identity and the per-endpoint circuit breaker registry.
//!
//! A mutex-guarded handle registry: one shared atomic state per key,
//! looked up under a short-lived lock and then used lock-free.

use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerPolicy, CircuitBreakerState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A provider endpoint: one base URL an account can be routed to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub provider: String,
    pub account: String,
    pub base_url: String,
}

impl Endpoint {
    pub fn new(
        provider: impl Into<String>,
        account: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            account: account.into(),
            base_url: base_url.into(),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.provider, self.account, self.base_url)
    }
}

/// A registry of circuit breakers keyed by [`Endpoint`], one atomic state per
/// endpoint, all sharing the same trip/reset configuration.
///
/// New endpoints are registered lazily on first use so callers never need to
/// pre-populate the set before routing traffic.
pub struct EndpointSet {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<Endpoint, Arc<CircuitBreakerState>>>,
}

impl EndpointSet {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (creating if absent) the breaker for `endpoint`.
    pub fn breaker(&self, endpoint: &Endpoint) -> CircuitBreakerPolicy {
        let mut breakers = self.breakers.lock().expect("endpoint registry poisoned");
        let state = breakers
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(CircuitBreakerState::new()))
            .clone();
        CircuitBreakerPolicy::from_shared(state, self.config.clone())
    }

    /// Whether `endpoint` currently permits a call, registering it first if unseen.
    pub fn allow(&self, endpoint: &Endpoint) -> bool {
        self.breaker(endpoint).allow()
    }

    pub fn record_success(&self, endpoint: &Endpoint) {
        self.breaker(endpoint).record_success();
    }

    pub fn record_failure(&self, endpoint: &Endpoint) {
        self.breaker(endpoint).record_failure();
    }

    /// Return the first endpoint in `order` whose breaker `allow()`s a call.
    /// This is the only path that can promote an endpoint from `Open` to
    /// `HalfOpen` and reserve one of its half-open trial slots, so callers
    /// must actually dispatch to whichever endpoint this returns.
    pub fn first_available<'a>(&self, order: &'a [Endpoint]) -> Option<&'a Endpoint> {
        order.iter().find(|endpoint| self.breaker(endpoint).allow())
    }

    /// Force every known endpoint back to `Closed`.
    pub fn reset_all(&self) {
        let breakers = self.breakers.lock().expect("endpoint registry poisoned");
        for state in breakers.values() {
            state.reset();
        }
    }
}
