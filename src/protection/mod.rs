//! Protection stack: composes the admission components around a router.
//!
//! # Data Flow
//! ```text
//! Incoming request (outermost first):
//!     → resolve client IP
//!     → IpBlocker        (403 for blocked IPs)
//!     → CircuitBreaker   (503 while open / half-open exhausted)
//!     → Fingerprinter    (403 suspicious agent if enabled, 429 distributed shape)
//!     → violation tracker (429 below → violation → maybe 403 block)
//!     → TieredRateLimiter (429 per IP and tier)
//!     → handler
//! ```
//!
//! # Design Decisions
//! - Cheapest, most certain rejections run first
//! - Components never call each other; only the violation tracker bridges
//!   the rate limiter's outcome into the IP blocker, with a fresh lock
//! - Webhook routes skip fingerprinting and violation tracking since many
//!   senders share one client shape

pub mod stats;
pub mod violations;

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, Router};

use crate::config::ProtectionConfig;
use crate::lifecycle::{BackgroundTasks, Shutdown};
use crate::resilience::circuit_breaker::{circuit_breaker_middleware, CircuitBreaker};
use crate::security::fingerprint::{fingerprint_middleware, RequestFingerprinter};
use crate::security::headers::resolve_client_ip;
use crate::security::ip_blocker::{ip_block_middleware, IpBlocker};
use crate::security::rate_limit::{
    rate_limit_middleware, tier_rate_limit_middleware, EndpointTier, TierPolicy,
    TieredRateLimiter,
};

pub use stats::ProtectionStats;
pub use violations::violation_tracking_middleware;

/// The four admission components, shared by every router they protect.
#[derive(Debug, Clone)]
pub struct DdosProtection {
    ip_blocker: Arc<IpBlocker>,
    circuit_breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<TieredRateLimiter>,
    fingerprinter: Arc<RequestFingerprinter>,
    trust_forwarded: bool,
}

impl DdosProtection {
    pub fn new(config: &ProtectionConfig) -> Self {
        let protection = Self::from_parts(
            IpBlocker::from_config(&config.ip_blocker),
            CircuitBreaker::from_config(&config.circuit_breaker),
            TieredRateLimiter::from_config(&config.rate_limit),
            RequestFingerprinter::from_config(&config.fingerprint),
        )
        .trust_forwarded_headers(config.trust_forwarded_headers);

        tracing::info!(
            trust_forwarded = config.trust_forwarded_headers,
            "DDoS protection initialized"
        );
        protection
    }

    /// Assemble from individually configured components. Forwarded headers are trusted.
    pub fn from_parts(
        ip_blocker: IpBlocker,
        circuit_breaker: CircuitBreaker,
        rate_limiter: TieredRateLimiter,
        fingerprinter: RequestFingerprinter,
    ) -> Self {
        Self {
            ip_blocker: Arc::new(ip_blocker),
            circuit_breaker: Arc::new(circuit_breaker),
            rate_limiter: Arc::new(rate_limiter),
            fingerprinter: Arc::new(fingerprinter),
            trust_forwarded: true,
        }
    }

    pub fn trust_forwarded_headers(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    /// Spawn every component's periodic tasks. They stop when `shutdown` fires.
    pub fn start(&self, shutdown: &Shutdown) -> BackgroundTasks {
        let mut tasks = BackgroundTasks::new();
        tasks.extend(self.circuit_breaker.start(shutdown));
        tasks.extend(self.ip_blocker.start(shutdown));
        tasks.extend(self.rate_limiter.start(shutdown));
        tasks.extend(self.fingerprinter.start(shutdown));
        tracing::debug!(tasks = tasks.len(), "Protection background tasks started");
        tasks
    }

    /// Full stack; the rate-limit tier is chosen per request from the path.
    pub fn protect<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let router = router.layer(from_fn_with_state(
            Arc::clone(&self.rate_limiter),
            rate_limit_middleware,
        ));
        self.wrap_outer(self.wrap_inspection(router))
    }

    /// Full stack with a fixed rate-limit tier.
    pub fn protect_tier<S>(&self, router: Router<S>, tier: EndpointTier) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let router = router.layer(from_fn_with_state(self.policy(tier), tier_rate_limit_middleware));
        self.wrap_outer(self.wrap_inspection(router))
    }

    pub fn protect_auth<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.protect_tier(router, EndpointTier::Auth)
    }

    pub fn protect_expensive<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.protect_tier(router, EndpointTier::Expensive)
    }

    pub fn protect_standard<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        self.protect_tier(router, EndpointTier::Standard)
    }

    /// IP blocking, circuit breaker and the webhook tier only.
    pub fn protect_webhook<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        let router = router.layer(from_fn_with_state(
            self.policy(EndpointTier::Webhook),
            tier_rate_limit_middleware,
        ));
        self.wrap_outer(router)
    }

    pub fn stats(&self) -> ProtectionStats {
        ProtectionStats {
            circuit_breaker: self.circuit_breaker.stats(),
            ip_blocker: self.ip_blocker.stats(),
            fingerprinter: self.fingerprinter.stats(),
        }
    }

    pub fn ip_blocker(&self) -> &Arc<IpBlocker> {
        &self.ip_blocker
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub fn rate_limiter(&self) -> &Arc<TieredRateLimiter> {
        &self.rate_limiter
    }

    pub fn fingerprinter(&self) -> &Arc<RequestFingerprinter> {
        &self.fingerprinter
    }

    fn policy(&self, tier: EndpointTier) -> TierPolicy {
        TierPolicy {
            limiter: Arc::clone(&self.rate_limiter),
            tier,
        }
    }

    /// Violation tracking, then fingerprinting, around the rate limiter.
    fn wrap_inspection<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(from_fn_with_state(
                Arc::clone(&self.ip_blocker),
                violation_tracking_middleware,
            ))
            .layer(from_fn_with_state(
                Arc::clone(&self.fingerprinter),
                fingerprint_middleware,
            ))
    }

    /// Circuit breaker, IP blocking and client IP resolution, outermost last.
    fn wrap_outer<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(from_fn_with_state(
                Arc::clone(&self.circuit_breaker),
                circuit_breaker_middleware,
            ))
            .layer(from_fn_with_state(Arc::clone(&self.ip_blocker), ip_block_middleware))
            .layer(from_fn_with_state(self.trust_forwarded, resolve_client_ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    use crate::config::ProtectionConfig;
    use crate::security::headers::{X_BLOCK_REASON, X_RATELIMIT_TIER, X_REQUEST_FINGERPRINT};
    use crate::security::rate_limit::TierLimit;

    fn request(path: &str, ip: &str) -> Request<Body> {
        Request::builder()
            .uri(path)
            .header("x-forwarded-for", ip)
            .header("user-agent", "Mozilla/5.0")
            .body(Body::empty())
            .unwrap()
    }

    fn strict_protection() -> DdosProtection {
        let mut config = ProtectionConfig::default();
        config.rate_limit.standard = TierLimit::new(1.0, 1);
        config.rate_limit.webhook = TierLimit::new(1.0, 1);
        config.ip_blocker.max_violations = 2;
        DdosProtection::new(&config)
    }

    #[tokio::test]
    async fn admitted_request_carries_stack_headers() {
        let protection = DdosProtection::new(&ProtectionConfig::default());
        let app = protection.protect(Router::new().route("/api/items", get(|| async { "ok" })));

        let response = app.oneshot(request("/api/items", "203.0.113.10")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_RATELIMIT_TIER], "standard");
        assert!(response.headers().contains_key(X_REQUEST_FINGERPRINT));
        assert_eq!(protection.circuit_breaker().concurrent(), 0);
    }

    #[tokio::test]
    async fn repeated_violations_escalate_to_block() {
        let protection = strict_protection();
        let app = protection.protect(Router::new().route("/api/items", get(|| async { "ok" })));
        let ip = "203.0.113.11";

        let ok = app.clone().oneshot(request("/api/items", ip)).await.unwrap();
        assert_eq!(ok.status(), StatusCode::OK);

        let limited = app.clone().oneshot(request("/api/items", ip)).await.unwrap();
        assert_eq!(limited.status(), StatusCode::TOO_MANY_REQUESTS);

        let escalated = app.clone().oneshot(request("/api/items", ip)).await.unwrap();
        assert_eq!(escalated.status(), StatusCode::FORBIDDEN);
        assert_eq!(escalated.headers()[X_BLOCK_REASON], "rate-limit-violation");

        let blocked = app.clone().oneshot(request("/api/items", ip)).await.unwrap();
        assert_eq!(blocked.status(), StatusCode::FORBIDDEN);
        assert!(protection.ip_blocker().is_blocked(ip.parse().unwrap()));

        let other = app.oneshot(request("/api/items", "203.0.113.12")).await.unwrap();
        assert_eq!(other.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_routes_are_not_escalated() {
        let protection = strict_protection();
        let app = protection.protect_webhook(Router::new().route("/hook", get(|| async { "ok" })));
        let ip = "203.0.113.13";

        for _ in 0..5 {
            app.clone().oneshot(request("/hook", ip)).await.unwrap();
        }
        let response = app.oneshot(request("/hook", ip)).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(!response.headers().contains_key(X_REQUEST_FINGERPRINT));
        assert!(!protection.ip_blocker().is_blocked(ip.parse().unwrap()));
    }

    #[tokio::test]
    async fn open_circuit_rejects_before_rate_limiting() {
        let protection = DdosProtection::from_parts(
            IpBlocker::new(10, Duration::from_secs(60), Duration::from_secs(60)),
            CircuitBreaker::new(1, 1, Duration::from_secs(30)),
            TieredRateLimiter::new(crate::security::rate_limit::default_tier_limits()),
            RequestFingerprinter::new(100, Duration::from_secs(300), 10),
        );
        let app = protection.protect_standard(Router::new().route("/", get(|| async { "ok" })));

        let first = app.clone().oneshot(request("/", "203.0.113.14")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request("/", "203.0.113.15")).await.unwrap();
        assert_eq!(second.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!second.headers().contains_key(X_RATELIMIT_TIER));

        let stats = protection.stats();
        assert_eq!(stats.circuit_breaker.circuit_openings, 1);
        assert_eq!(stats.fingerprinter.total_requests, 1);
    }

    #[tokio::test]
    async fn start_spawns_tasks_that_stop_on_shutdown() {
        let protection = DdosProtection::new(&ProtectionConfig::default());
        let shutdown = Shutdown::new();
        let tasks = protection.start(&shutdown);
        assert_eq!(tasks.len(), 5);

        shutdown.trigger();
        tasks.join().await;
    }
}
