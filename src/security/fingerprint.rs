//! Request fingerprinting for distributed-attack detection.
//!
//! # Responsibilities
//! - Hash the shape of a request (client software headers + header names)
//! - Track which client IPs present each fingerprint
//! - Throttle a fingerprint once enough distinct IPs share it
//! - Flag User-Agents matching known tool and scanner patterns
//!
//! # Design Decisions
//! - Per-session headers (credentials, cookies, forwarding) are excluded so
//!   one client build hashes identically from every IP
//! - A fingerprint marked distributed stays distributed
//! - Ordinary fingerprints are tracked but never throttled

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{
        header::{ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, USER_AGENT},
        HeaderMap, HeaderName, HeaderValue, Request,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::config::FingerprintConfig;
use crate::http::response::{RateScope, Rejection};
use crate::lifecycle::{spawn_periodic, BackgroundTasks, Shutdown};
use crate::observability::metrics;
use crate::security::headers::{client_ip, X_REQUEST_FINGERPRINT};
use crate::security::token_bucket::TokenBucket;

/// Header names left out of the fingerprint.
const VOLATILE_HEADERS: [&str; 6] = [
    "authorization",
    "cookie",
    "x-request-id",
    "x-forwarded-for",
    "x-real-ip",
    "content-length",
];

/// Length of the fingerprint prefix stamped on responses.
pub const SHORT_FINGERPRINT_LEN: usize = 8;

/// Built-in User-Agent deny patterns.
pub fn default_suspicious_agents() -> HashSet<String> {
    [
        // missing
        "", "-",
        // HTTP tooling
        "python-requests", "python-urllib", "curl", "wget", "httpie", "postman",
        // bots
        "bot", "crawler", "spider", "scraper",
        // scanners
        "scanner", "nikto", "sqlmap", "nmap", "masscan", "zap", "burp", "acunetix", "nessus",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Hash the request shape.
///
/// SHA-256 over `UA|Accept|Accept-Language|Accept-Encoding|` followed by the
/// sorted, comma-joined header names (minus volatile ones). The first 16
/// bytes are hex-encoded.
pub fn fingerprint(headers: &HeaderMap) -> String {
    let mut names: Vec<&str> = headers
        .keys()
        .map(HeaderName::as_str)
        .filter(|name| !VOLATILE_HEADERS.contains(name))
        .collect();
    names.sort_unstable();

    let data = format!(
        "{}|{}|{}|{}|{}",
        header_str(headers, USER_AGENT),
        header_str(headers, ACCEPT),
        header_str(headers, ACCEPT_LANGUAGE),
        header_str(headers, ACCEPT_ENCODING),
        names.join(",")
    );

    let digest = Sha256::digest(data.as_bytes());
    hex::encode(&digest[..16])
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// What [`RequestFingerprinter::record_request`] learned about one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintObservation {
    pub fingerprint: String,
    pub suspicious: bool,
    pub distributed: bool,
}

impl FingerprintObservation {
    pub fn short(&self) -> &str {
        &self.fingerprint[..SHORT_FINGERPRINT_LEN.min(self.fingerprint.len())]
    }
}

#[derive(Debug)]
struct FingerprintRecord {
    ips: HashSet<IpAddr>,
    bucket: TokenBucket,
    last_seen: Instant,
    request_count: u64,
    distributed: bool,
}

#[derive(Debug)]
pub struct RequestFingerprinter {
    fingerprints: RwLock<HashMap<String, FingerprintRecord>>,
    suspicious_agents: RwLock<HashSet<String>>,
    max_requests: u64,
    window: Duration,
    suspicious_threshold: usize,
    block_suspicious: bool,
}

impl RequestFingerprinter {
    pub fn new(max_requests: u64, window: Duration, suspicious_threshold: usize) -> Self {
        tracing::info!(
            max_requests,
            window = ?window,
            suspicious_threshold,
            "Request fingerprinter configured"
        );

        Self {
            fingerprints: RwLock::new(HashMap::new()),
            suspicious_agents: RwLock::new(default_suspicious_agents()),
            max_requests,
            window,
            suspicious_threshold,
            block_suspicious: false,
        }
    }

    /// Reject requests whose User-Agent is suspicious with 403.
    pub fn block_suspicious_agents(mut self, enabled: bool) -> Self {
        self.block_suspicious = enabled;
        self
    }

    pub fn from_config(config: &FingerprintConfig) -> Self {
        let fingerprinter = Self::new(
            config.max_requests_per_fingerprint,
            Duration::from_secs(config.window_secs),
            config.suspicious_ip_threshold,
        )
        .block_suspicious_agents(config.block_suspicious_agents);

        for pattern in &config.extra_suspicious_agents {
            fingerprinter.add_suspicious_agent(pattern);
        }
        fingerprinter
    }

    pub fn blocks_suspicious_agents(&self) -> bool {
        self.block_suspicious
    }

    /// Record a request from `ip` and classify it.
    pub fn record_request(&self, ip: IpAddr, headers: &HeaderMap) -> FingerprintObservation {
        let fingerprint = fingerprint(headers);
        let suspicious = self.is_suspicious_agent(header_str(headers, USER_AGENT));

        let mut fingerprints = self.fingerprints.write();
        let now = Instant::now();
        let record = fingerprints
            .entry(fingerprint.clone())
            .or_insert_with(|| FingerprintRecord {
                ips: HashSet::new(),
                bucket: self.new_bucket(),
                last_seen: now,
                request_count: 0,
                distributed: false,
            });

        record.ips.insert(ip);
        record.last_seen = now;
        record.request_count += 1;

        if !record.distributed && record.ips.len() >= self.suspicious_threshold {
            record.distributed = true;
            metrics::record_distributed_fingerprint();
            tracing::warn!(
                fingerprint = &fingerprint[..SHORT_FINGERPRINT_LEN],
                ips = record.ips.len(),
                "Fingerprint shared by many IPs, throttling enabled"
            );
        }
        let distributed = record.distributed;

        FingerprintObservation {
            fingerprint,
            suspicious,
            distributed,
        }
    }

    /// Take a token from the fingerprint's bucket. Unknown fingerprints pass.
    pub fn allow(&self, fingerprint: &str) -> bool {
        match self.fingerprints.write().get_mut(fingerprint) {
            Some(record) => record.bucket.try_acquire(),
            None => true,
        }
    }

    /// Blank and `-` User-Agents match exactly; other patterns match as
    /// case-insensitive substrings.
    pub fn is_suspicious_agent(&self, user_agent: &str) -> bool {
        let ua = user_agent.trim().to_ascii_lowercase();
        self.suspicious_agents
            .read()
            .iter()
            .any(|pattern| match pattern.as_str() {
                "" | "-" => ua == *pattern,
                p => ua.contains(p),
            })
    }

    pub fn add_suspicious_agent(&self, pattern: &str) {
        self.suspicious_agents
            .write()
            .insert(pattern.trim().to_ascii_lowercase());
    }

    pub fn stats(&self) -> FingerprinterStats {
        let fingerprints = self.fingerprints.read();
        FingerprinterStats {
            unique_fingerprints: fingerprints.len(),
            total_ips: fingerprints.values().map(|r| r.ips.len()).sum(),
            total_requests: fingerprints.values().map(|r| r.request_count).sum(),
            distributed_fingerprints: fingerprints.values().filter(|r| r.distributed).count(),
        }
    }

    /// Drop fingerprints unseen for twice the window.
    pub fn sweep_stale(&self) -> usize {
        let max_idle = self.window * 2;
        let mut fingerprints = self.fingerprints.write();
        let before = fingerprints.len();
        fingerprints.retain(|_, r| r.last_seen.elapsed() <= max_idle);
        before - fingerprints.len()
    }

    pub fn start(self: &Arc<Self>, shutdown: &Shutdown) -> BackgroundTasks {
        let fingerprinter = Arc::clone(self);
        let mut tasks = BackgroundTasks::new();
        tasks.push(spawn_periodic(
            "fingerprint-sweep",
            Duration::from_secs(60),
            shutdown,
            move || {
                let removed = fingerprinter.sweep_stale();
                if removed > 0 {
                    tracing::debug!(removed, "Stale fingerprints removed");
                }
            },
        ));
        tasks
    }

    fn new_bucket(&self) -> TokenBucket {
        let rate = self.max_requests as f64 / self.window.as_secs_f64().max(1.0);
        let burst = (self.max_requests / 10).max(1);
        TokenBucket::new(rate, u32::try_from(burst).unwrap_or(u32::MAX))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FingerprinterStats {
    pub unique_fingerprints: usize,
    pub total_ips: usize,
    pub total_requests: u64,
    pub distributed_fingerprints: usize,
}

/// Middleware: fingerprint, optionally deny suspicious agents, throttle distributed shapes.
pub async fn fingerprint_middleware(
    State(fingerprinter): State<Arc<RequestFingerprinter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    let observation = fingerprinter.record_request(ip, request.headers());

    let mut response = if observation.suspicious && fingerprinter.blocks_suspicious_agents() {
        tracing::warn!(
            ip = %ip,
            user_agent = ?request.headers().get(USER_AGENT),
            "Suspicious User-Agent blocked"
        );
        let rejection = Rejection::SuspiciousAgent;
        metrics::record_rejection(rejection.reason());
        rejection.into_response()
    } else if observation.distributed && !fingerprinter.allow(&observation.fingerprint) {
        tracing::warn!(
            ip = %ip,
            fingerprint = observation.short(),
            "Distributed fingerprint throttled"
        );
        let rejection = Rejection::RateExceeded {
            scope: RateScope::Fingerprint,
        };
        metrics::record_rejection(rejection.reason());
        rejection.into_response()
    } else {
        if observation.suspicious {
            tracing::debug!(ip = %ip, fingerprint = observation.short(), "Suspicious User-Agent");
        }
        next.run(request).await
    };

    if let Ok(value) = HeaderValue::from_str(observation.short()) {
        response.headers_mut().insert(X_REQUEST_FINGERPRINT, value);
    }
    response
}
