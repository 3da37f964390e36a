//! Adaptive request-admission layer for axum services.
//!
//! Four cooperating components decide, per request, whether it reaches the
//! application: a global circuit breaker, a violation-based IP blocklist, a
//! tiered per-endpoint token-bucket rate limiter and a request fingerprinter
//! that detects many IPs sharing one request shape.
//!
//! ```text
//! client → LimitedListener → resolve IP → IpBlocker → CircuitBreaker
//!        → Fingerprinter → violation tracker → TieredRateLimiter → app
//! ```

pub mod admin;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod protection;
pub mod resilience;
pub mod security;

pub use config::ShieldConfig;
pub use http::ShieldServer;
pub use lifecycle::Shutdown;
pub use protection::DdosProtection;
