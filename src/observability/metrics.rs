//! Metrics collection and exposition.
//!
//! # Metrics
//! - `microcomms_dispatch_total` (counter): attempts by protocol, outcome
//! - `microcomms_dispatch_duration_seconds` (histogram): attempt latency
//! - `microcomms_circuit_state` (gauge): 0=closed, 1=open, 2=half-open
//! - `microcomms_circuit_rejections_total` (counter): fail-fast rejections
//! - `microcomms_rate_limited_total` (counter): limiter denials by resource
//! - `microcomms_discovery_lookups_total` (counter): hit, refresh, stale, error
//! - `microcomms_discovery_cached_services` (gauge)

use std::net::SocketAddr;

use ::metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::time::Instant;

use crate::resilience::circuit_breaker::CircuitState;
use crate::transport::Protocol;

/// Install the Prometheus recorder and serve it on `addr`.
///
/// Must run inside a tokio runtime. Failure is logged, not fatal.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_dispatch(protocol: Protocol, outcome: &'static str, start: Instant) {
    let labels = [("protocol", protocol.as_str()), ("outcome", outcome)];
    counter!("microcomms_dispatch_total", &labels).increment(1);
    histogram!("microcomms_dispatch_duration_seconds", &labels)
        .record(start.elapsed().as_secs_f64());
}

pub fn record_breaker_state(name: &str, state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::Open => 1.0,
        CircuitState::HalfOpen => 2.0,
    };
    gauge!("microcomms_circuit_state", "circuit" => name.to_string()).set(value);
}

pub fn record_breaker_rejection(name: &str) {
    counter!("microcomms_circuit_rejections_total", "circuit" => name.to_string()).increment(1);
}

pub fn record_rate_limited(resource: &str) {
    counter!("microcomms_rate_limited_total", "resource" => resource.to_string()).increment(1);
}

pub fn record_discovery_lookup(outcome: &'static str) {
    counter!("microcomms_discovery_lookups_total", "outcome" => outcome).increment(1);
}

pub fn record_discovery_cache_size(size: usize) {
    gauge!("microcomms_discovery_cached_services").set(size as f64);
}
