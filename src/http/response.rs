//! Admission rejections and how they are rendered to clients.
//!
//! # Taxonomy
//! - Overload: circuit open or half-open exhausted → 503, self-healing
//! - RateExceeded: token bucket empty → 429, self-healing on refill
//! - Blocked: IP on the blocklist → 403, until expiry or manual unblock
//! - SuspiciousAgent: denied User-Agent → 403, this request only
//!
//! Every rejection carries a reason header and a plain-text body; the wrapped
//! handler never sees a rejected request.

use std::time::Duration;

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::resilience::circuit_breaker::CircuitState;
use crate::security::headers::{
    BLOCK_REASON_RATE_LIMIT, BLOCK_REASON_SUSPICIOUS_AGENT, RETRY_AFTER, X_BLOCK_REASON,
    X_CIRCUIT_STATE, X_RATELIMIT_REMAINING,
};

/// Retry hint sent while the circuit breaker is rejecting.
pub const CIRCUIT_RETRY_AFTER_SECS: u64 = 5;
/// Retry hint for per-client and per-tier rate limits.
pub const CLIENT_RETRY_AFTER_SECS: u64 = 1;
/// Retry hint for distributed-fingerprint throttling.
pub const FINGERPRINT_RETRY_AFTER_SECS: u64 = 60;

/// Which limiter produced a rate rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateScope {
    /// Per-IP limit (single policy or tiered).
    Client,
    /// Shared limit on a distributed request fingerprint.
    Fingerprint,
}

/// Why a request was not admitted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("service overloaded (circuit {state})")]
    Overload { state: CircuitState },

    #[error("rate limit exceeded ({scope:?})")]
    RateExceeded { scope: RateScope },

    #[error("client blocked for {}s", retry_after.as_secs())]
    Blocked { retry_after: Duration },

    #[error("suspicious user agent")]
    SuspiciousAgent,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::Overload { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Rejection::RateExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::Blocked { .. } | Rejection::SuspiciousAgent => StatusCode::FORBIDDEN,
        }
    }

    /// Short label used for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::Overload { .. } => "overload",
            Rejection::RateExceeded {
                scope: RateScope::Client,
            } => "rate_limit",
            Rejection::RateExceeded {
                scope: RateScope::Fingerprint,
            } => "fingerprint",
            Rejection::Blocked { .. } => "blocked",
            Rejection::SuspiciousAgent => "suspicious_agent",
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Rejection::Overload {
                state: CircuitState::HalfOpen,
            } => "Server is busy. Please try again shortly.",
            Rejection::Overload { .. } => {
                "Service temporarily unavailable due to high load. Please try again later."
            }
            Rejection::RateExceeded {
                scope: RateScope::Client,
            } => "Too many requests. Please slow down.",
            Rejection::RateExceeded {
                scope: RateScope::Fingerprint,
            } => "Too many requests from similar clients.",
            Rejection::Blocked { .. } => {
                "Your IP has been temporarily blocked due to excessive requests."
            }
            Rejection::SuspiciousAgent => "Forbidden",
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = (self.status(), self.message()).into_response();
        let headers = response.headers_mut();

        match &self {
            Rejection::Overload { state } => {
                headers.insert(RETRY_AFTER, HeaderValue::from(CIRCUIT_RETRY_AFTER_SECS));
                headers.insert(X_CIRCUIT_STATE, HeaderValue::from_static(state.as_str()));
            }
            Rejection::RateExceeded {
                scope: RateScope::Client,
            } => {
                headers.insert(RETRY_AFTER, HeaderValue::from(CLIENT_RETRY_AFTER_SECS));
                headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
            }
            Rejection::RateExceeded {
                scope: RateScope::Fingerprint,
            } => {
                headers.insert(RETRY_AFTER, HeaderValue::from(FINGERPRINT_RETRY_AFTER_SECS));
            }
            Rejection::Blocked { retry_after } => {
                headers.insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs().max(1)));
                headers.insert(X_BLOCK_REASON, HeaderValue::from_static(BLOCK_REASON_RATE_LIMIT));
            }
            Rejection::SuspiciousAgent => {
                headers.insert(
                    X_BLOCK_REASON,
                    HeaderValue::from_static(BLOCK_REASON_SUSPICIOUS_AGENT),
                );
            }
        }

        response
    }
}
