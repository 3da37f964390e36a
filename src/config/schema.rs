//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the shield.
//! All types derive Serde traits for deserialization from config files, and
//! every field has a default so an empty file is a valid configuration.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::security::rate_limit::{EndpointTier, TierLimit};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ShieldConfig {
    /// Listener configuration (bind address, connection limits).
    pub listener: ListenerConfig,

    /// Admission control thresholds.
    pub protection: ProtectionConfig,

    /// Operator API.
    pub admin: AdminConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// How long to wait for a free connection slot before shedding a connection.
    pub accept_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 1000,
            accept_timeout_secs: 5,
        }
    }
}

/// Settings for the whole admission stack.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Resolve client IPs from X-Forwarded-For / X-Real-IP.
    /// Only enable behind a proxy that overwrites these headers.
    pub trust_forwarded_headers: bool,

    pub circuit_breaker: CircuitBreakerConfig,
    pub ip_blocker: IpBlockerConfig,
    pub rate_limit: RateLimitConfig,
    pub fingerprint: FingerprintConfig,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            trust_forwarded_headers: true,
            circuit_breaker: CircuitBreakerConfig::default(),
            ip_blocker: IpBlockerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            fingerprint: FingerprintConfig::default(),
        }
    }
}

/// Global overload thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// In-flight requests at which the circuit trips.
    pub max_concurrent: u64,

    /// Requests per one-second window at which the circuit trips.
    pub max_requests_per_sec: u64,

    /// Time the circuit stays open before probing.
    pub open_timeout_secs: u64,

    /// Trial requests admitted per half-open batch.
    pub half_open_max_requests: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            max_requests_per_sec: 500,
            open_timeout_secs: 30,
            half_open_max_requests: 5,
        }
    }
}

/// Escalation of repeated rate-limit violations into IP blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IpBlockerConfig {
    /// Violations within the window that trigger a block.
    pub max_violations: u32,

    /// How long a block lasts.
    pub block_duration_secs: u64,

    /// Window over which violations accumulate.
    pub violation_window_secs: u64,
}

impl Default for IpBlockerConfig {
    fn default() -> Self {
        Self {
            max_violations: 10,
            block_duration_secs: 15 * 60,
            violation_window_secs: 5 * 60,
        }
    }
}

/// Per-tier token bucket settings. A tier with `rps <= 0` is unlimited.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub standard: TierLimit,
    pub auth: TierLimit,
    pub expensive: TierLimit,
    pub webhook: TierLimit,
    pub health: TierLimit,

    /// Extra path → tier routes, merged over the built-in table.
    /// Keys ending in `/` match as prefixes.
    pub endpoints: BTreeMap<String, EndpointTier>,
}

impl RateLimitConfig {
    pub fn limit(&self, tier: EndpointTier) -> TierLimit {
        match tier {
            EndpointTier::Standard => self.standard,
            EndpointTier::Auth => self.auth,
            EndpointTier::Expensive => self.expensive,
            EndpointTier::Webhook => self.webhook,
            EndpointTier::Health => self.health,
        }
    }

    pub fn limit_mut(&mut self, tier: EndpointTier) -> &mut TierLimit {
        match tier {
            EndpointTier::Standard => &mut self.standard,
            EndpointTier::Auth => &mut self.auth,
            EndpointTier::Expensive => &mut self.expensive,
            EndpointTier::Webhook => &mut self.webhook,
            EndpointTier::Health => &mut self.health,
        }
    }

    /// Limits for every tier, keyed by tier.
    pub fn tier_limits(&self) -> HashMap<EndpointTier, TierLimit> {
        EndpointTier::ALL
            .into_iter()
            .map(|tier| (tier, self.limit(tier)))
            .collect()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            standard: TierLimit::new(10.0, 20),
            auth: TierLimit::new(5.0, 10),
            expensive: TierLimit::new(2.0, 5),
            webhook: TierLimit::new(20.0, 50),
            health: TierLimit::UNLIMITED,
            endpoints: BTreeMap::new(),
        }
    }
}

/// Distributed-attack detection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Requests a distributed fingerprint may make per window.
    pub max_requests_per_fingerprint: u64,

    /// Fingerprint accounting window.
    pub window_secs: u64,

    /// Distinct IPs sharing a fingerprint before it is throttled.
    pub suspicious_ip_threshold: usize,

    /// Reject suspicious User-Agents with 403 instead of only flagging them.
    pub block_suspicious_agents: bool,

    /// Additional User-Agent deny patterns (case-insensitive substrings).
    pub extra_suspicious_agents: Vec<String>,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            max_requests_per_fingerprint: 100,
            window_secs: 5 * 60,
            suspicious_ip_threshold: 10,
            block_suspicious_agents: false,
            extra_suspicious_agents: Vec::new(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Operator API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the operator API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Operator API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: String::new(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}
