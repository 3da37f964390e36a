//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (net::listener)
//!     → server.rs (axum setup, tracing layer)
//!     → protection stack (admit or reject)
//!     → response.rs (rejections rendered with status, headers, body)
//!     → application router
//! ```

pub mod response;
pub mod server;

pub use response::{RateScope, Rejection};
pub use server::{default_app, ShieldServer};
