//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (slot acquisition with timeout, shed on timeout)
//!     → connection.rs (accounting until the stream is dropped)
//!     → Hand off to HTTP layer (axum::serve)
//! ```
//!
//! # Design Decisions
//! - Bounded connection count prevents resource exhaustion
//! - Shed connections are closed immediately, never queued unbounded

pub mod connection;
pub mod listener;

pub use connection::{ConnectionCounters, ConnectionStats};
pub use listener::{LimitedListener, ListenerError};
