//! Resilient multi-protocol message dispatch.
//!
//! # Architecture Overview
//!
//! ```text
//!   MessageRequest ──▶ Dispatcher ──▶ ProtocolPolicy (explicit | fallback | auto)
//!                          │
//!                          │ per attempt
//!                          ├──▶ DiscoveryCache ──▶ DiscoveryProvider
//!                          ├──▶ RateLimiter (per protocol resource)
//!                          ├──▶ CircuitBreaker (per protocol resource)
//!                          └──▶ Transport (http | rpc | queue)
//!                                   │
//!   MessageResponse ◀───────────────┘   or DispatchError
//! ```
//!
//! Breakers and limiters are owned by the dispatcher through registries;
//! nothing here is global except the optional metrics recorder and the
//! tracing subscriber installed by the binary.

pub mod config;
pub mod discovery;
pub mod dispatch;
pub mod error;
pub mod observability;
pub mod resilience;
pub mod transport;

pub use config::DispatchConfig;
pub use discovery::{DiscoveryCache, DiscoveryProvider, ServiceInstance, StaticProvider};
pub use dispatch::{Dispatcher, DispatcherBuilder, ProtocolPolicy};
pub use error::{CancelReason, DispatchError, ServiceError};
pub use transport::{MessageRequest, MessageResponse, Payload, Protocol, Transport};
