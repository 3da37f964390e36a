//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::time::Duration;

use axum::{body::Body, http::Request, routing::get, Router};

use ddos_shield::resilience::circuit_breaker::CircuitBreaker;
use ddos_shield::security::fingerprint::RequestFingerprinter;
use ddos_shield::security::ip_blocker::IpBlocker;
use ddos_shield::security::rate_limit::{default_tier_limits, TieredRateLimiter};
use ddos_shield::DdosProtection;

/// GET `path` as if sent by `ip` behind a trusted proxy.
pub fn request_from(path: &str, ip: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header("x-forwarded-for", ip)
        .header("user-agent", "Mozilla/5.0 (X11; Linux x86_64)")
        .header("accept", "text/html")
        .body(Body::empty())
        .unwrap()
}

/// Routes covering every tier of the built-in endpoint table.
pub fn app() -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/auth/login", get(|| async { "login" }))
        .route("/api/courses", get(|| async { "courses" }))
        .route("/api/items", get(|| async { "items" }))
}

/// Protection with production defaults apart from a lenient fingerprinter,
/// so tests sharing one header shape are never throttled as distributed.
pub fn protection_with_blocker(blocker: IpBlocker) -> DdosProtection {
    DdosProtection::from_parts(
        blocker,
        CircuitBreaker::new(1_000, 10_000, Duration::from_secs(30)),
        TieredRateLimiter::new(default_tier_limits()),
        RequestFingerprinter::new(10_000, Duration::from_secs(60), 1_000),
    )
}

pub fn protection() -> DdosProtection {
    protection_with_blocker(IpBlocker::new(
        10,
        Duration::from_secs(15 * 60),
        Duration::from_secs(5 * 60),
    ))
}

pub fn header<'a>(response: &'a axum::response::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
