//! Client address resolution and the response headers set by the admission layer.
//!
//! # Responsibilities
//! - Resolve the client IP from X-Forwarded-For, X-Real-IP or the socket peer
//! - Resolve once per request and carry the result as a request extension
//! - Name every header the protection layers write
//!
//! # Design Decisions
//! - Forwarded headers are only honored when explicitly trusted
//! - Only the first X-Forwarded-For entry is considered (the original client)
//! - Unparseable header values fall through to the next source

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

pub const RETRY_AFTER: &str = "retry-after";
pub const X_CIRCUIT_STATE: &str = "x-circuit-state";
pub const X_BLOCK_REASON: &str = "x-block-reason";
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const X_RATELIMIT_TIER: &str = "x-ratelimit-tier";
pub const X_REQUEST_FINGERPRINT: &str = "x-request-fingerprint";

/// Value of `X-Block-Reason` for IPs blocked after repeated violations.
pub const BLOCK_REASON_RATE_LIMIT: &str = "rate-limit-violation";
pub const BLOCK_REASON_SUSPICIOUS_AGENT: &str = "suspicious-user-agent";

/// Resolved client address, inserted into request extensions by [`resolve_client_ip`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

/// Resolve the client IP from headers and connection info.
pub fn extract_client_ip(req: &Request<Body>, trust_forwarded: bool) -> IpAddr {
    if trust_forwarded {
        if let Some(ip) = forwarded_ip(req.headers()) {
            return ip;
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// The client IP for this request.
///
/// Uses the value resolved by the outermost layer when present, otherwise
/// resolves it on the spot trusting forwarded headers.
pub fn client_ip(req: &Request<Body>) -> IpAddr {
    match req.extensions().get::<ClientIp>() {
        Some(ClientIp(ip)) => *ip,
        None => extract_client_ip(req, true),
    }
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    let from_xff = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|xff| xff.split(',').next())
        .and_then(|first| first.trim().parse::<IpAddr>().ok());

    from_xff.or_else(|| {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    })
}

/// Outermost layer: resolve the client IP once for every inner layer.
pub async fn resolve_client_ip(
    State(trust_forwarded): State<bool>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let ip = extract_client_ip(&request, trust_forwarded);
    request.extensions_mut().insert(ClientIp(ip));
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(headers: &[(&str, &str)]) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        for (k, v) in headers {
            builder = builder.header(*k, *v);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn first_forwarded_for_entry_wins() {
        let req = request_with(&[("X-Forwarded-For", "203.0.113.7, 10.0.0.1")]);
        assert_eq!(client_ip(&req), "203.0.113.7".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn invalid_forwarded_for_falls_back_to_real_ip() {
        let req = request_with(&[
            ("X-Forwarded-For", "not-an-ip"),
            ("X-Real-IP", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&req), "198.51.100.2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn untrusted_headers_use_peer_address() {
        let mut req = request_with(&[("X-Forwarded-For", "203.0.113.7")]);
        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.9:4000".parse::<SocketAddr>().unwrap()));
        assert_eq!(
            extract_client_ip(&req, false),
            "192.0.2.9".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn resolved_extension_takes_precedence() {
        let mut req = request_with(&[("X-Forwarded-For", "203.0.113.7")]);
        let resolved: IpAddr = "192.0.2.1".parse().unwrap();
        req.extensions_mut().insert(ClientIp(resolved));
        assert_eq!(client_ip(&req), resolved);
    }

    #[test]
    fn no_source_yields_unspecified() {
        let req = request_with(&[]);
        assert_eq!(client_ip(&req), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }
}
