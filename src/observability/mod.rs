//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Breakers, limiters, discovery and the dispatcher produce:
//!     → logging.rs (structured tracing events, one span per dispatch)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape, when enabled)
//! ```
//!
//! # Design Decisions
//! - Request ID flows through the dispatch span
//! - Metrics are cheap (atomic increments) and no-ops until a recorder is
//!   installed, so library users and tests pay nothing

pub mod logging;
pub mod metrics;
