//! Per-resource breaker and limiter registries.
//!
//! # Responsibilities
//! - Build one breaker (and optionally one limiter) per protocol resource
//! - Hand out shared references to the dispatcher
//!
//! # Design Decisions
//! - Registries are plain values owned by the dispatcher, never globals,
//!   so every test gets fresh instances
//! - Every protocol always has a breaker; a missing config entry falls back
//!   to the protocol's default thresholds

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::resilience::circuit_breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};
use crate::resilience::rate_limiter::RateLimiter;
use crate::transport::Protocol;

/// Circuit breakers keyed by protocol.
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: [Arc<CircuitBreaker>; Protocol::ALL.len()],
}

impl BreakerRegistry {
    /// Breakers built from the `[circuit_breaker]` config section.
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self::with_settings(|protocol| config.circuit_breaker.settings_for(protocol))
    }

    /// Breakers with thresholds supplied per protocol.
    pub fn with_settings(mut settings: impl FnMut(Protocol) -> BreakerConfig) -> Self {
        let breakers = Protocol::ALL.map(|protocol| {
            Arc::new(CircuitBreaker::new(protocol.as_str(), settings(protocol)))
        });
        Self { breakers }
    }

    pub fn get(&self, protocol: Protocol) -> Arc<CircuitBreaker> {
        self.breakers[protocol.index()].clone()
    }

    /// Snapshots of every breaker, ordered by protocol.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }
}

/// Rate limiters keyed by protocol.
#[derive(Debug)]
pub struct LimiterRegistry {
    limiters: [Arc<RateLimiter>; Protocol::ALL.len()],
}

impl LimiterRegistry {
    /// One independent bucket per protocol, all with the same rate and burst.
    pub fn uniform(rate_per_second: f64, capacity: f64) -> Self {
        let limiters = Protocol::ALL.map(|_| Arc::new(RateLimiter::new(rate_per_second, capacity)));
        Self { limiters }
    }

    /// `None` when rate limiting is disabled in config.
    pub fn from_config(config: &DispatchConfig) -> Option<Self> {
        let rl = &config.rate_limit;
        rl.enabled
            .then(|| Self::uniform(rl.rate_per_second, rl.capacity))
    }

    pub fn get(&self, protocol: Protocol) -> Arc<RateLimiter> {
        self.limiters[protocol.index()].clone()
    }
}
