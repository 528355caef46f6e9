//! Message dispatch.
//!
//! # Data Flow
//! ```text
//! Dispatcher::send(request, policy)
//!     → policy.rs (candidate protocols: explicit, fallback chain, or auto)
//!     → per attempt: discovery → rate limiter → circuit breaker → transport
//!     → MessageResponse { protocol_used } | DispatchError
//! ```
//!
//! # Design Decisions
//! - Fallback is control flow inside one call, bounded by one deadline
//! - Cancellation ends the chain at once; other failures move to the next
//!   protocol and only the last one is reported

pub mod dispatcher;
pub mod policy;

pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use policy::{select_auto, ProtocolPolicy};
