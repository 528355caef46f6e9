//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Dispatcher attempt:
//!     → rate_limiter.rs (token bucket admission, per resource)
//!     → circuit_breaker.rs (fail fast when the resource is open)
//!     → retries.rs (transport-level retry with backoff.rs jitter)
//!     → transport
//! ```
//!
//! # Design Decisions
//! - Every guarded call has a deadline; expiry is not a breaker failure
//! - Breakers and limiters are per resource, held in registry.rs
//! - Locks guard bookkeeping only, never a network call

pub mod backoff;
pub mod circuit_breaker;
pub mod rate_limiter;
pub mod registry;
pub mod retries;

pub use circuit_breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
pub use rate_limiter::RateLimiter;
pub use registry::{BreakerRegistry, LimiterRegistry};
pub use retries::{RetryPolicy, Retrying};
