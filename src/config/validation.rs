//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds, rates and timeouts > 0)
//! - Check that every protocol name resolves, once
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DispatchConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::DispatchConfig;
use crate::transport::Protocol;

/// A single semantic problem, attributed to a config path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &DispatchConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_fallback_order(config, &mut errors);
    validate_breakers(config, &mut errors);

    if config.transport.timeout_ms == 0 {
        errors.push(ValidationError::new("transport.timeout_ms", "must be positive"));
    }
    if config.transport.retry_attempts == 0 {
        errors.push(ValidationError::new(
            "transport.retry_attempts",
            "must be at least 1",
        ));
    }
    if config.transport.retry_base_delay_ms > config.transport.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "transport.retry_base_delay_ms",
            "must not exceed retry_max_delay_ms",
        ));
    }

    let rl = &config.rate_limit;
    if !(rl.rate_per_second.is_finite() && rl.rate_per_second > 0.0) {
        errors.push(ValidationError::new("rate_limit.rate_per_second", "must be positive"));
    }
    if !(rl.capacity.is_finite() && rl.capacity >= 1.0) {
        errors.push(ValidationError::new("rate_limit.capacity", "must be at least 1"));
    }

    if config.discovery.ttl_secs == 0 {
        errors.push(ValidationError::new("discovery.ttl_secs", "must be positive"));
    }
    for (i, service) in config.discovery.services.iter().enumerate() {
        if service.name.is_empty() {
            errors.push(ValidationError::new(
                format!("discovery.services[{}].name", i),
                "must not be empty",
            ));
        }
    }

    if config.queue.capacity == 0 {
        errors.push(ValidationError::new("queue.capacity", "must be positive"));
    }
    if config.queue.send_timeout_ms == 0 {
        errors.push(ValidationError::new("queue.send_timeout_ms", "must be positive"));
    }

    let obs = &config.observability;
    if obs.metrics_enabled && obs.metrics_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", obs.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_fallback_order(config: &DispatchConfig, errors: &mut Vec<ValidationError>) {
    if config.fallback_order.is_empty() {
        errors.push(ValidationError::new("fallback_order", "must not be empty"));
        return;
    }

    let mut seen = HashSet::new();
    for name in &config.fallback_order {
        match name.parse::<Protocol>() {
            Ok(protocol) if !seen.insert(protocol) => errors.push(ValidationError::new(
                "fallback_order",
                format!("'{}' listed more than once", protocol),
            )),
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::new(
                "fallback_order",
                format!("unknown protocol '{}'", name),
            )),
        }
    }
}

fn validate_breakers(config: &DispatchConfig, errors: &mut Vec<ValidationError>) {
    let cb = &config.circuit_breaker;

    check_resource_keys("circuit_breaker.thresholds", cb.thresholds.keys(), errors);
    check_resource_keys("circuit_breaker.reset_timeouts_ms", cb.reset_timeouts_ms.keys(), errors);

    for (key, threshold) in &cb.thresholds {
        if *threshold == 0 {
            errors.push(ValidationError::new(
                format!("circuit_breaker.thresholds.{}", key),
                "must be positive",
            ));
        }
    }
    for (key, timeout) in &cb.reset_timeouts_ms {
        if *timeout == 0 {
            errors.push(ValidationError::new(
                format!("circuit_breaker.reset_timeouts_ms.{}", key),
                "must be positive",
            ));
        }
    }
}

fn check_resource_keys<'a>(
    field: &str,
    keys: impl Iterator<Item = &'a String>,
    errors: &mut Vec<ValidationError>,
) {
    let mut seen = HashSet::new();
    let mut keys: Vec<_> = keys.collect();
    keys.sort();

    for key in keys {
        match key.parse::<Protocol>() {
            Ok(protocol) if !seen.insert(protocol) => errors.push(ValidationError::new(
                field,
                format!("'{}' duplicates another key for {}", key, protocol),
            )),
            Ok(_) => {}
            Err(_) => errors.push(ValidationError::new(
                field,
                format!("unknown resource '{}'", key),
            )),
        }
    }
}
