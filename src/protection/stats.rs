//! Read-only snapshot of every component, served by the operator API.

use serde::Serialize;

use crate::resilience::circuit_breaker::CircuitBreakerStats;
use crate::security::fingerprint::FingerprinterStats;
use crate::security::ip_blocker::IpBlockerStats;

#[derive(Debug, Clone, Serialize)]
pub struct ProtectionStats {
    pub circuit_breaker: CircuitBreakerStats,
    pub ip_blocker: IpBlockerStats,
    pub fingerprinter: FingerprinterStats,
}
