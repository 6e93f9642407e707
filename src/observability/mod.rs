//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Queue, pool, engine and DNS cache produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are cheap (atomic increments)
//! - Failing to log or export never affects scheduling

pub mod logging;
pub mod metrics;
