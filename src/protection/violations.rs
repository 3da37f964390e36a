//! Escalation of rate-limit rejections into IP blocks.
//!
//! Sits directly outside the rate limiter. Every `429` that comes back is
//! recorded against the client IP; when that violation crosses the blocker's
//! threshold the response is upgraded to the `403` a blocked IP would get.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;

use crate::http::response::Rejection;
use crate::observability::metrics;
use crate::security::headers::client_ip;
use crate::security::ip_blocker::IpBlocker;

pub async fn violation_tracking_middleware(
    State(blocker): State<Arc<IpBlocker>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    let response = next.run(request).await;

    if response.status() != StatusCode::TOO_MANY_REQUESTS {
        return response;
    }

    metrics::record_violation();
    if !blocker.record_violation(ip) {
        return response;
    }

    let retry_after = blocker
        .block_expiry(ip)
        .map(|expiry| expiry.saturating_duration_since(Instant::now()))
        .unwrap_or_default();
    tracing::warn!(ip = %ip, "Repeated rate-limit violations, IP blocked");
    Rejection::Blocked { retry_after }.into_response()
}
