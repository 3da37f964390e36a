//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request admission:
//!     → circuit_breaker.rs (global concurrency and RPS thresholds)
//!     → Closed: admit; Open: reject 503; HalfOpen: admit a trial batch
//!     → handler completes → release slot, report success (non-5xx)
//! ```
//!
//! # Design Decisions
//! - One breaker per process, shared by every protected route
//! - Admission slots are released on every exit path, including panics
//! - Recovery is judged only by the trial requests of the current batch

pub mod circuit_breaker;

pub use circuit_breaker::{circuit_breaker_middleware, CircuitBreaker, CircuitState};
