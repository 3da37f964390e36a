//! Per-client token-bucket rate limiting, tiered by endpoint.
//!
//! # Responsibilities
//! - Classify each path into an [`EndpointTier`] (exact match, then longest prefix)
//! - Keep one lazily created bucket per (client IP, tier)
//! - Report quota through `X-RateLimit-*` headers on every limited response
//! - Evict buckets idle for more than [`VISITOR_IDLE_TTL`]
//!
//! A tier whose `rps` is zero or negative is unlimited: no bucket, no headers.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::RateLimitConfig;
use crate::http::response::{RateScope, Rejection};
use crate::lifecycle::{spawn_periodic, BackgroundTasks, Shutdown};
use crate::observability::metrics;
use crate::security::headers::{
    client_ip, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING, X_RATELIMIT_RESET, X_RATELIMIT_TIER,
};
use crate::security::token_bucket::TokenBucket;

/// Buckets untouched for longer than this are evicted by the sweep.
pub const VISITOR_IDLE_TTL: Duration = Duration::from_secs(180);
const SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Sensitivity class of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointTier {
    Standard,
    /// Login and registration; strict to slow down brute force.
    Auth,
    /// Costly handlers (generation, heavy queries).
    Expensive,
    /// Third-party callbacks.
    Webhook,
    /// Probes; unlimited by default.
    Health,
}

impl EndpointTier {
    pub const ALL: [EndpointTier; 5] = [
        EndpointTier::Standard,
        EndpointTier::Auth,
        EndpointTier::Expensive,
        EndpointTier::Webhook,
        EndpointTier::Health,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointTier::Standard => "standard",
            EndpointTier::Auth => "auth",
            EndpointTier::Expensive => "expensive",
            EndpointTier::Webhook => "webhook",
            EndpointTier::Health => "health",
        }
    }
}

impl fmt::Display for EndpointTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate and burst for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierLimit {
    pub rps: f64,
    pub burst: u32,
}

impl TierLimit {
    pub const UNLIMITED: TierLimit = TierLimit { rps: 0.0, burst: 0 };

    pub const fn new(rps: f64, burst: u32) -> Self {
        Self { rps, burst }
    }

    pub fn is_unlimited(&self) -> bool {
        self.rps <= 0.0
    }
}

/// Built-in path table. Entries ending in `/` act as prefixes for everything below them.
pub fn default_endpoint_tiers() -> HashMap<String, EndpointTier> {
    [
        ("/health", EndpointTier::Health),
        ("/api/auth/", EndpointTier::Auth),
        ("/api/auth/login", EndpointTier::Auth),
        ("/api/auth/register", EndpointTier::Auth),
        ("/api/auth/refresh", EndpointTier::Auth),
        ("/api/auth/logout", EndpointTier::Auth),
        ("/api/me/next-step", EndpointTier::Expensive),
        ("/api/courses", EndpointTier::Expensive),
        ("/api/courses/", EndpointTier::Expensive),
        ("/api/webhooks/", EndpointTier::Webhook),
        ("/api/webhooks/stripe", EndpointTier::Webhook),
    ]
    .into_iter()
    .map(|(path, tier)| (path.to_string(), tier))
    .collect()
}

/// Outcome of a single bucket check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Tier has no limit; nothing was tracked.
    Unlimited,
    Allowed { remaining: u64 },
    Limited,
}

#[derive(Debug)]
struct Visitor {
    bucket: TokenBucket,
    last_seen: Instant,
}

impl Visitor {
    fn new(limit: TierLimit) -> Self {
        Self {
            bucket: TokenBucket::new(limit.rps, limit.burst),
            last_seen: Instant::now(),
        }
    }

    fn take(&mut self) -> RateDecision {
        self.last_seen = Instant::now();
        if self.bucket.try_acquire() {
            RateDecision::Allowed {
                remaining: self.bucket.remaining(),
            }
        } else {
            RateDecision::Limited
        }
    }
}

/// Per-(IP, tier) token buckets with path-based tier routing.
#[derive(Debug)]
pub struct TieredRateLimiter {
    configs: HashMap<EndpointTier, TierLimit>,
    endpoint_tiers: RwLock<HashMap<String, EndpointTier>>,
    visitors: DashMap<(IpAddr, EndpointTier), Visitor>,
}

impl TieredRateLimiter {
    /// Tiers missing from `configs` are unlimited.
    pub fn new(configs: HashMap<EndpointTier, TierLimit>) -> Self {
        for tier in EndpointTier::ALL {
            if let Some(limit) = configs.get(&tier).filter(|l| !l.is_unlimited()) {
                tracing::info!(tier = %tier, rps = limit.rps, burst = limit.burst, "Tier rate limit configured");
            }
        }

        Self {
            configs,
            endpoint_tiers: RwLock::new(default_endpoint_tiers()),
            visitors: DashMap::new(),
        }
    }

    /// Limits from config; configured endpoints are merged over the built-in table.
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let limiter = Self::new(config.tier_limits());
        for (path, tier) in &config.endpoints {
            limiter.set_endpoint_tier(path.clone(), *tier);
        }
        limiter
    }

    pub fn limit_for(&self, tier: EndpointTier) -> TierLimit {
        self.configs.get(&tier).copied().unwrap_or(TierLimit::UNLIMITED)
    }

    /// Route `path_prefix` (or exact path) to `tier`.
    pub fn set_endpoint_tier(&self, path_prefix: impl Into<String>, tier: EndpointTier) {
        self.endpoint_tiers.write().insert(path_prefix.into(), tier);
    }

    /// Exact match first, then the longest registered prefix, else `Standard`.
    pub fn tier_for_path(&self, path: &str) -> EndpointTier {
        let table = self.endpoint_tiers.read();

        if let Some(tier) = table.get(path) {
            return *tier;
        }

        table
            .iter()
            .filter(|(prefix, _)| path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, tier)| *tier)
            .unwrap_or(EndpointTier::Standard)
    }

    /// Take one token from the bucket of (`ip`, `tier`), creating it if needed.
    pub fn check(&self, ip: IpAddr, tier: EndpointTier) -> RateDecision {
        let limit = self.limit_for(tier);
        if limit.is_unlimited() {
            return RateDecision::Unlimited;
        }

        self.visitors
            .entry((ip, tier))
            .or_insert_with(|| Visitor::new(limit))
            .take()
    }

    pub fn visitor_count(&self) -> usize {
        self.visitors.len()
    }

    /// Evict buckets idle longer than [`VISITOR_IDLE_TTL`].
    pub fn sweep_idle_visitors(&self) -> usize {
        let before = self.visitors.len();
        self.visitors
            .retain(|_, v| v.last_seen.elapsed() <= VISITOR_IDLE_TTL);
        before.saturating_sub(self.visitors.len())
    }

    pub fn start(self: &Arc<Self>, shutdown: &Shutdown) -> BackgroundTasks {
        let limiter = Arc::clone(self);
        let mut tasks = BackgroundTasks::new();
        tasks.push(spawn_periodic(
            "tier-visitor-sweep",
            SWEEP_PERIOD,
            shutdown,
            move || {
                let evicted = limiter.sweep_idle_visitors();
                if evicted > 0 {
                    tracing::debug!(evicted, "Idle tier buckets evicted");
                }
            },
        ));
        tasks
    }
}

/// The full default tier table.
pub fn default_tier_limits() -> HashMap<EndpointTier, TierLimit> {
    HashMap::from([
        (EndpointTier::Standard, TierLimit::new(10.0, 20)),
        (EndpointTier::Auth, TierLimit::new(5.0, 10)),
        (EndpointTier::Expensive, TierLimit::new(2.0, 5)),
        (EndpointTier::Webhook, TierLimit::new(20.0, 50)),
        (EndpointTier::Health, TierLimit::UNLIMITED),
    ])
}

/// State for [`tier_rate_limit_middleware`]: a limiter pinned to one tier.
#[derive(Debug, Clone)]
pub struct TierPolicy {
    pub limiter: Arc<TieredRateLimiter>,
    pub tier: EndpointTier,
}

/// Middleware: tier chosen from the request path.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<TieredRateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let tier = limiter.tier_for_path(request.uri().path());
    enforce_tier(&limiter, tier, request, next).await
}

/// Middleware: tier fixed by the route group.
pub async fn tier_rate_limit_middleware(
    State(policy): State<TierPolicy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce_tier(&policy.limiter, policy.tier, request, next).await
}

async fn enforce_tier(
    limiter: &TieredRateLimiter,
    tier: EndpointTier,
    request: Request<Body>,
    next: Next,
) -> Response {
    let limit = limiter.limit_for(tier);
    if limit.is_unlimited() {
        return next.run(request).await;
    }

    let ip = client_ip(&request);
    let reset = unix_now() + 1;

    let mut response = match limiter.check(ip, tier) {
        RateDecision::Unlimited => return next.run(request).await,
        RateDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            response
                .headers_mut()
                .insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining));
            response
        }
        RateDecision::Limited => {
            tracing::debug!(ip = %ip, tier = %tier, "Tier rate limit exceeded");
            let rejection = Rejection::RateExceeded {
                scope: RateScope::Client,
            };
            metrics::record_rejection(rejection.reason());
            rejection.into_response()
        }
    };

    let headers = response.headers_mut();
    insert_limit(headers, limit.rps);
    headers.insert(X_RATELIMIT_TIER, HeaderValue::from_static(tier.as_str()));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset));
    response
}

/// Single-policy per-IP limiter.
#[derive(Debug)]
pub struct RateLimiter {
    limit: TierLimit,
    visitors: DashMap<IpAddr, Visitor>,
}

impl RateLimiter {
    pub fn new(rps: f64, burst: u32) -> Self {
        tracing::info!(rps, burst, "Rate limiter configured");
        Self {
            limit: TierLimit::new(rps, burst),
            visitors: DashMap::new(),
        }
    }

    pub fn check(&self, ip: IpAddr) -> bool {
        let limit = self.limit;
        matches!(
            self.visitors
                .entry(ip)
                .or_insert_with(|| Visitor::new(limit))
                .take(),
            RateDecision::Allowed { .. }
        )
    }

    pub fn sweep_idle_visitors(&self) -> usize {
        let before = self.visitors.len();
        self.visitors
            .retain(|_, v| v.last_seen.elapsed() <= VISITOR_IDLE_TTL);
        before.saturating_sub(self.visitors.len())
    }

    pub fn start(self: &Arc<Self>, shutdown: &Shutdown) -> BackgroundTasks {
        let limiter = Arc::clone(self);
        let mut tasks = BackgroundTasks::new();
        tasks.push(spawn_periodic(
            "visitor-sweep",
            SWEEP_PERIOD,
            shutdown,
            move || {
                limiter.sweep_idle_visitors();
            },
        ));
        tasks
    }
}

/// Middleware for [`RateLimiter`].
pub async fn rate_limiter_middleware(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    if limiter.check(ip) {
        return next.run(request).await;
    }

    tracing::debug!(ip = %ip, "Rate limit exceeded");
    let rejection = Rejection::RateExceeded {
        scope: RateScope::Client,
    };
    metrics::record_rejection(rejection.reason());
    let mut response = rejection.into_response();
    insert_limit(response.headers_mut(), limiter.limit.rps);
    response
}

fn insert_limit(headers: &mut HeaderMap, rps: f64) {
    if let Ok(value) = HeaderValue::from_str(&format!("{rps:.0}")) {
        headers.insert(X_RATELIMIT_LIMIT, value);
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    use crate::security::headers::RETRY_AFTER;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    fn get_request(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[test]
    fn tier_routing() {
        let limiter = TieredRateLimiter::new(default_tier_limits());

        assert_eq!(limiter.tier_for_path("/api/auth/login"), EndpointTier::Auth);
        assert_eq!(limiter.tier_for_path("/api/auth/sessions/42"), EndpointTier::Auth);
        assert_eq!(limiter.tier_for_path("/api/unknown"), EndpointTier::Standard);
        assert_eq!(limiter.tier_for_path("/health"), EndpointTier::Health);
        assert_eq!(limiter.tier_for_path("/api/courses/7/lessons"), EndpointTier::Expensive);
        assert_eq!(limiter.tier_for_path("/api/webhooks/stripe"), EndpointTier::Webhook);
    }

    #[test]
    fn longer_prefix_wins() {
        let limiter = TieredRateLimiter::new(default_tier_limits());
        limiter.set_endpoint_tier("/api/", EndpointTier::Expensive);
        limiter.set_endpoint_tier("/api/public/", EndpointTier::Webhook);

        assert_eq!(limiter.tier_for_path("/api/public/feed"), EndpointTier::Webhook);
        assert_eq!(limiter.tier_for_path("/api/other"), EndpointTier::Expensive);
    }

    #[test]
    fn health_tier_tracks_nothing() {
        let limiter = TieredRateLimiter::new(default_tier_limits());
        for _ in 0..100 {
            assert_eq!(limiter.check(ip("192.0.2.1"), EndpointTier::Health), RateDecision::Unlimited);
        }
        assert_eq!(limiter.visitor_count(), 0);
    }

    #[test]
    fn tiers_have_separate_buckets() {
        let limiter = TieredRateLimiter::new(HashMap::from([
            (EndpointTier::Auth, TierLimit::new(1.0, 1)),
            (EndpointTier::Standard, TierLimit::new(1.0, 2)),
        ]));
        let client = ip("192.0.2.2");

        assert_eq!(limiter.check(client, EndpointTier::Auth), RateDecision::Allowed { remaining: 0 });
        assert_eq!(limiter.check(client, EndpointTier::Auth), RateDecision::Limited);
        assert_eq!(limiter.check(client, EndpointTier::Standard), RateDecision::Allowed { remaining: 1 });
        assert_eq!(limiter.check(ip("192.0.2.3"), EndpointTier::Auth), RateDecision::Allowed { remaining: 0 });
        assert_eq!(limiter.visitor_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_buckets_are_evicted() {
        let limiter = TieredRateLimiter::new(default_tier_limits());
        limiter.check(ip("192.0.2.4"), EndpointTier::Standard);

        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.check(ip("192.0.2.5"), EndpointTier::Standard);
        assert_eq!(limiter.sweep_idle_visitors(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.sweep_idle_visitors(), 1);
        assert_eq!(limiter.visitor_count(), 1);
    }

    #[tokio::test]
    async fn middleware_sets_quota_headers() {
        let limiter = Arc::new(TieredRateLimiter::new(default_tier_limits()));
        let app = Router::new()
            .route("/api/auth/login", get(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, rate_limit_middleware));

        let response = app.oneshot(get_request("/api/auth/login")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_TIER], "auth");
        assert_eq!(response.headers()[X_RATELIMIT_LIMIT], "5");
        assert_eq!(response.headers()[X_RATELIMIT_REMAINING], "9");
        assert!(response.headers().contains_key(X_RATELIMIT_RESET));
    }

    #[tokio::test]
    async fn health_responses_carry_no_quota_headers() {
        let limiter = Arc::new(TieredRateLimiter::new(default_tier_limits()));
        let app = Router::new()
            .route("/health", get(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, rate_limit_middleware));

        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!response.headers().contains_key(X_RATELIMIT_TIER));
    }

    #[tokio::test]
    async fn fixed_tier_rejects_with_retry_after() {
        let limiter = Arc::new(TieredRateLimiter::new(HashMap::from([(
            EndpointTier::Expensive,
            TierLimit::new(1.0, 1),
        )])));
        let policy = TierPolicy {
            limiter,
            tier: EndpointTier::Expensive,
        };
        let app = Router::new()
            .route("/generate", get(|| async { "ok" }))
            .layer(from_fn_with_state(policy, tier_rate_limit_middleware));

        let first = app.clone().oneshot(get_request("/generate")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(get_request("/generate")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[RETRY_AFTER], "1");
        assert_eq!(second.headers()[X_RATELIMIT_REMAINING], "0");
        assert_eq!(second.headers()[X_RATELIMIT_TIER], "expensive");
    }

    #[tokio::test(start_paused = true)]
    async fn single_policy_limiter_refills_after_a_second() {
        let limiter = Arc::new(RateLimiter::new(1.0, 1));
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(from_fn_with_state(limiter, rate_limiter_middleware));

        let first = app.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.clone().oneshot(get_request("/")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(second.headers()[RETRY_AFTER], "1");
        assert_eq!(second.headers()[X_RATELIMIT_LIMIT], "1");

        tokio::time::advance(Duration::from_millis(1001)).await;
        let third = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(third.status(), StatusCode::OK);
    }
}
