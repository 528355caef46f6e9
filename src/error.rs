//! Dispatch error taxonomy.
//!
//! Policy failures (open circuit, rate limit, discovery, cancellation) are
//! kept apart from transport failures so callers can tell "we refused to
//! send" from "the downstream failed".

use std::fmt;

use thiserror::Error;

use crate::discovery::DiscoveryError;
use crate::transport::{Protocol, TransportError};

/// Why an in-flight call was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Cancelled,
    /// The request deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("cancelled by caller"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

/// Errors returned by [`crate::dispatch::Dispatcher::send`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The resource's circuit breaker rejected the call.
    #[error("circuit breaker '{resource}' is open")]
    CircuitOpen { resource: String },

    /// Admission denied by the rate limiter.
    #[error("rate limited on '{resource}'")]
    RateLimited { resource: String },

    /// Target resolution failed.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Caller deadline or cancellation fired mid-call.
    #[error("request {0}")]
    Cancelled(CancelReason),

    /// Unknown protocol name, or no transport registered for it.
    #[error("unsupported protocol: {0}")]
    ProtocolUnsupported(String),

    /// Normalized transport failure.
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl DispatchError {
    /// True when the failure came from the downstream rather than this layer.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, DispatchError::Service(_))
    }
}

/// A transport failure attributed to the service it was sent to.
#[derive(Debug, Error)]
#[error("service {service_name} error (status {status_code}): {message}")]
pub struct ServiceError {
    pub service_name: String,
    /// Protocol status, 0 when the transport reported none.
    pub status_code: u16,
    pub message: String,
    pub protocol: Protocol,
    #[source]
    pub source: TransportError,
}

impl ServiceError {
    pub(crate) fn from_transport(service_name: &str, protocol: Protocol, source: TransportError) -> Self {
        Self {
            service_name: service_name.to_string(),
            status_code: source.status_code.unwrap_or(0),
            message: source.message.clone(),
            protocol,
            source,
        }
    }
}
