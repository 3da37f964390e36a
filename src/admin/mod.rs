//! Operator API: inspect the protection stack and override its decisions.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::net::connection::ConnectionCounters;
use crate::protection::DdosProtection;

/// State shared by the admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub protection: DdosProtection,
    pub connections: Option<Arc<ConnectionCounters>>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(protection: DdosProtection, api_key: &str) -> Self {
        Self {
            protection,
            connections: None,
            api_key: Arc::from(api_key),
            started_at: Instant::now(),
        }
    }

    pub fn with_connections(mut self, counters: Arc<ConnectionCounters>) -> Self {
        self.connections = Some(counters);
        self
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/ddos/stats", get(get_stats))
        .route("/admin/ddos/blocked", get(get_blocked))
        .route("/admin/ddos/blocked/{ip}", delete(unblock_ip))
        .route("/admin/ddos/circuit/reset", post(reset_circuit))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
