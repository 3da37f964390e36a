use std::net::IpAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::net::connection::ConnectionStats;
use crate::protection::ProtectionStats;
use crate::resilience::circuit_breaker::CircuitState;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub circuit_state: CircuitState,
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub protection: ProtectionStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<ConnectionStats>,
}

#[derive(Serialize)]
pub struct BlockedIp {
    pub ip: IpAddr,
    pub remaining_secs: u64,
}

#[derive(Serialize)]
pub struct UnblockResult {
    pub ip: IpAddr,
    pub was_blocked: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let circuit_state = state.protection.circuit_breaker().state();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: if circuit_state == CircuitState::Closed {
            "operational"
        } else {
            "degraded"
        },
        uptime_secs: state.started_at.elapsed().as_secs(),
        circuit_state,
    })
}

pub async fn get_stats(State(state): State<AdminState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        protection: state.protection.stats(),
        connections: state.connections.as_ref().map(|c| c.stats()),
    })
}

pub async fn get_blocked(State(state): State<AdminState>) -> Json<Vec<BlockedIp>> {
    let mut blocked: Vec<BlockedIp> = state
        .protection
        .ip_blocker()
        .blocked_ips()
        .into_iter()
        .map(|(ip, remaining)| BlockedIp {
            ip,
            remaining_secs: remaining.as_secs(),
        })
        .collect();
    blocked.sort_by_key(|b| b.ip);
    Json(blocked)
}

pub async fn unblock_ip(
    State(state): State<AdminState>,
    Path(ip): Path<String>,
) -> Result<Json<UnblockResult>, (StatusCode, String)> {
    let ip: IpAddr = ip
        .parse()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid IP address: {ip}")))?;

    let was_blocked = state.protection.ip_blocker().unblock(ip);
    Ok(Json(UnblockResult { ip, was_blocked }))
}

pub async fn reset_circuit(State(state): State<AdminState>) -> Json<SystemStatus> {
    state.protection.circuit_breaker().reset();
    get_status(State(state)).await
}
