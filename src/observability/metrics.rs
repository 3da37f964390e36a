//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define admission metrics (rejections, blocks, circuit state, connections)
//! - Expose a Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `shield_rejections_total` (counter): rejected requests by `reason`
//! - `shield_violations_total` (counter): rate-limit violations recorded
//! - `shield_ip_blocks_total` (counter): IPs added to the blocklist
//! - `shield_blocked_ips` (gauge): live blocklist size after each sweep
//! - `shield_circuit_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `shield_circuit_openings_total` (counter)
//! - `shield_in_flight_requests` (gauge): requests admitted by the circuit breaker
//! - `shield_distributed_fingerprints_total` (counter)
//! - `shield_connections_total` (counter): connections by `outcome` (accepted, rejected)
//! - `shield_active_connections` (gauge)
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Labels are static strings; client addresses never become labels

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::circuit_breaker::CircuitState;

/// Install the Prometheus recorder and its scrape listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_rejection(reason: &'static str) {
    counter!("shield_rejections_total", "reason" => reason).increment(1);
}

pub fn record_violation() {
    counter!("shield_violations_total").increment(1);
}

pub fn record_ip_blocked() {
    counter!("shield_ip_blocks_total").increment(1);
}

pub fn record_blocked_ips(count: usize) {
    gauge!("shield_blocked_ips").set(count as f64);
}

pub fn record_circuit_state(state: CircuitState) {
    let value = match state {
        CircuitState::Closed => 0.0,
        CircuitState::HalfOpen => 1.0,
        CircuitState::Open => {
            counter!("shield_circuit_openings_total").increment(1);
            2.0
        }
    };
    gauge!("shield_circuit_state").set(value);
}

pub fn record_in_flight(count: i64) {
    gauge!("shield_in_flight_requests").set(count as f64);
}

pub fn record_distributed_fingerprint() {
    counter!("shield_distributed_fingerprints_total").increment(1);
}

pub fn record_connection_accepted() {
    counter!("shield_connections_total", "outcome" => "accepted").increment(1);
}

pub fn record_connection_rejected() {
    counter!("shield_connections_total", "outcome" => "rejected").increment(1);
}

pub fn record_active_connections(count: usize) {
    gauge!("shield_active_connections").set(count as f64);
}
