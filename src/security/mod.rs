//! Security subsystem: per-client admission checks.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → headers.rs (resolve client IP once)
//!     → ip_blocker.rs (reject known-bad IPs)
//!     → fingerprint.rs (hash request shape, throttle distributed shapes)
//!     → rate_limit.rs (per-IP, per-tier token buckets)
//!     → Pass to handler
//! ```
//!
//! # Design Decisions
//! - Each component owns its state behind its own lock; none call each other
//! - All checks are synchronous and never wait on another request
//! - Idle state is evicted by periodic sweeps, never on the request path

pub mod fingerprint;
pub mod headers;
pub mod ip_blocker;
pub mod rate_limit;
pub mod token_bucket;

pub use fingerprint::{fingerprint_middleware, RequestFingerprinter};
pub use ip_blocker::{ip_block_middleware, IpBlocker};
pub use rate_limit::{EndpointTier, RateLimiter, TierLimit, TieredRateLimiter};
