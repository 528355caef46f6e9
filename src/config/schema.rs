//! Configuration schema definitions.
//!
//! Every section has defaults, so an empty file is a valid configuration.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::cache::CacheSettings;
use crate::resilience::circuit_breaker::BreakerConfig;
use crate::resilience::retries::RetryPolicy;
use crate::transport::Protocol;

/// Root configuration for the dispatcher and its collaborators.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Protocol order tried by the fallback policy.
    pub fallback_order: Vec<String>,

    pub transport: TransportConfig,

    pub circuit_breaker: CircuitBreakerConfig,

    pub rate_limit: RateLimitConfig,

    pub discovery: DiscoveryConfig,

    pub queue: QueueConfig,

    pub observability: ObservabilityConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            fallback_order: Protocol::ALL.iter().map(|p| p.as_str().to_string()).collect(),
            transport: TransportConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            discovery: DiscoveryConfig::default(),
            queue: QueueConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl DispatchConfig {
    /// Parsed fallback order. Unknown names are dropped; validation reports them.
    pub fn fallback_protocols(&self) -> Vec<Protocol> {
        self.fallback_order
            .iter()
            .filter_map(|name| name.parse().ok())
            .collect()
    }
}

/// Transport timeouts and retries.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Default per-request deadline in milliseconds.
    pub timeout_ms: u64,

    /// Total attempts per transport send, including the first.
    pub retry_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub retry_base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub retry_max_delay_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 5000,
            retry_attempts: 3,
            retry_base_delay_ms: 100,
            retry_max_delay_ms: 2000,
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

/// Per-resource breaker thresholds, keyed by protocol name.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub thresholds: HashMap<String, u32>,

    /// Open duration before a probe, in milliseconds.
    pub reset_timeouts_ms: HashMap<String, u64>,
}

impl CircuitBreakerConfig {
    /// Configured values for `protocol`, falling back to its defaults.
    pub fn settings_for(&self, protocol: Protocol) -> BreakerConfig {
        let defaults = default_breaker(protocol);
        BreakerConfig {
            failure_threshold: lookup(&self.thresholds, protocol)
                .unwrap_or(defaults.failure_threshold),
            reset_timeout: lookup(&self.reset_timeouts_ms, protocol)
                .map(Duration::from_millis)
                .unwrap_or(defaults.reset_timeout),
        }
    }
}

fn lookup<V: Copy>(map: &HashMap<String, V>, protocol: Protocol) -> Option<V> {
    map.iter()
        .find(|(key, _)| key.parse::<Protocol>().is_ok_and(|p| p == protocol))
        .map(|(_, v)| *v)
}

/// Default thresholds per protocol.
pub fn default_breaker(protocol: Protocol) -> BreakerConfig {
    let (failure_threshold, reset_secs) = match protocol {
        Protocol::Http => (5, 30),
        Protocol::Rpc => (3, 20),
        Protocol::Queue => (10, 60),
    };
    BreakerConfig {
        failure_threshold,
        reset_timeout: Duration::from_secs(reset_secs),
    }
}

/// Token bucket settings, one bucket per protocol resource.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Refill rate in tokens per second.
    pub rate_per_second: f64,

    /// Burst capacity.
    pub capacity: f64,

    /// Wait for a token (bounded by the request deadline) instead of
    /// rejecting at once.
    pub wait_for_token: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            rate_per_second: 100.0,
            capacity: 50.0,
            wait_for_token: false,
        }
    }
}

/// Discovery cache settings and static service seeds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,

    /// Entry freshness window in seconds.
    pub ttl_secs: u64,

    pub serve_stale_on_error: bool,

    /// Maximum cached services, 0 for unbounded.
    pub max_entries: usize,

    /// Instances seeded into the static provider.
    pub services: Vec<ServiceEntry>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 30,
            serve_stale_on_error: false,
            max_entries: 0,
            services: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: Duration::from_secs(self.ttl_secs),
            serve_stale_on_error: self.serve_stale_on_error,
            max_entries: self.max_entries,
        }
    }
}

/// A statically known service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceEntry {
    pub name: String,
    pub address: String,
    pub port: u16,
}

/// In-memory queue transport settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
    pub send_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            send_timeout_ms: 2000,
        }
    }
}

impl QueueConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
