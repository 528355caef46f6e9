//! Transport subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher attempt:
//!     → CallContext (resolved endpoint, deadline, cancellation)
//!     → Transport::send (http.rs, memory.rs, or a caller-supplied impl)
//!     → TransportResponse | TransportError
//!     → normalized by the dispatcher into MessageResponse | ServiceError
//! ```
//!
//! # Design Decisions
//! - One trait for every protocol; the dispatcher never knows wire details
//! - Requests are borrowed, never mutated, by transports
//! - Transports do not enforce the caller deadline themselves; the circuit
//!   breaker races them against it so expiry is never counted as a failure

pub mod http;
pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::DispatchError;

/// Wire protocol families the dispatcher can route through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[serde(alias = "https")]
    Http,
    #[serde(alias = "grpc")]
    Rpc,
    #[serde(alias = "mq")]
    Queue,
}

impl Protocol {
    /// Every protocol, in the default fallback order.
    pub const ALL: [Protocol; 3] = [Protocol::Http, Protocol::Rpc, Protocol::Queue];

    /// Resource key used for circuit breakers, limiters and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Rpc => "rpc",
            Protocol::Queue => "queue",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Protocol::Http => 0,
            Protocol::Rpc => 1,
            Protocol::Queue => 2,
        }
    }

    /// Whether logical targets for this protocol go through service discovery.
    ///
    /// Queue targets are topic names handed to the broker as-is.
    pub fn uses_discovery(&self) -> bool {
        !matches!(self, Protocol::Queue)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(Protocol::Http),
            "rpc" | "grpc" => Ok(Protocol::Rpc),
            "queue" | "mq" => Ok(Protocol::Queue),
            other => Err(DispatchError::ProtocolUnsupported(other.to_string())),
        }
    }
}

/// Message body carried opaquely through the dispatcher.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    #[default]
    Empty,
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Empty => true,
            Payload::Bytes(b) => b.is_empty(),
            Payload::Text(t) => t.is_empty(),
            Payload::Json(_) => false,
        }
    }

    /// Raw bytes as they would go on the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Empty => Vec::new(),
            Payload::Bytes(b) => b.clone(),
            Payload::Text(t) => t.as_bytes().to_vec(),
            Payload::Json(v) => v.to_string().into_bytes(),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(b)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(v: serde_json::Value) -> Self {
        Payload::Json(v)
    }
}

/// A logical message addressed to a service name or a concrete address.
///
/// Built once by the caller and only borrowed from then on.
#[derive(Debug, Clone)]
pub struct MessageRequest {
    request_id: Uuid,
    target: String,
    payload: Payload,
    headers: HashMap<String, String>,
    timeout: Duration,
}

impl MessageRequest {
    /// Create a request for `target` with an empty payload.
    ///
    /// A zero timeout means "use the dispatcher default".
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            target: target.into(),
            payload: Payload::Empty,
            headers: HashMap::new(),
            timeout: Duration::ZERO,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Payload>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// What a transport hands back on success, before normalization.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    /// Protocol specific status, 0 when the protocol has none.
    pub status_code: u16,
    pub payload: Payload,
    pub headers: HashMap<String, String>,
}

/// Normalized response returned to dispatcher callers.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub status_code: u16,
    pub payload: Payload,
    pub headers: HashMap<String, String>,
    pub protocol_used: Protocol,
}

impl MessageResponse {
    pub(crate) fn from_transport(raw: TransportResponse, protocol: Protocol) -> Self {
        Self {
            status_code: raw.status_code,
            payload: raw.payload,
            headers: raw.headers,
            protocol_used: protocol,
        }
    }
}

/// Per-attempt context handed to a transport.
#[derive(Debug, Clone)]
pub struct CallContext {
    endpoint: String,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    pub fn new(endpoint: impl Into<String>, deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self {
            endpoint: endpoint.into(),
            deadline,
            cancel,
        }
    }

    /// Resolved address for this attempt (a URL, `host:port`, or queue name).
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Classification of transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Could not reach the endpoint.
    Connect,
    /// Endpoint answered with a failure status.
    Status,
    /// The transport's own timer fired (e.g. a full queue).
    Timeout,
    /// Request could not be encoded or was refused before sending.
    InvalidRequest,
    /// Anything else surfaced by the underlying client.
    Io,
}

/// Failure reported by a transport implementation.
#[derive(Debug, Error)]
#[error("{kind:?} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub status_code: Option<u16>,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn connect(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Connect, message)
    }

    pub fn status(code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(code),
            ..Self::new(TransportErrorKind::Status, message)
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Connection errors and 5xx statuses are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            TransportErrorKind::Connect | TransportErrorKind::Io => true,
            TransportErrorKind::Status => self.status_code.is_some_and(|c| c >= 500),
            TransportErrorKind::Timeout | TransportErrorKind::InvalidRequest => false,
        }
    }
}

/// A single wire protocol implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        ctx: &CallContext,
        request: &MessageRequest,
    ) -> Result<TransportResponse, TransportError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    async fn send(
        &self,
        ctx: &CallContext,
        request: &MessageRequest,
    ) -> Result<TransportResponse, TransportError> {
        (**self).send(ctx, request).await
    }
}
