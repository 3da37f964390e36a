//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields on every state change (trip, block, unblock, sweep)
//! - Metrics are cheap (atomic increments) and safe to call before a recorder exists
//! - Rejection counters are labelled by reason, never by client IP

pub mod logging;
pub mod metrics;
