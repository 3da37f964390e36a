//! HTTP server setup.
//!
//! # Responsibilities
//! - Mount the application router behind the protection stack
//! - Serve it on the connection-limited listener with client addresses
//! - Run the operator API on its own address when enabled
//! - Start background tasks and stop everything on shutdown

use std::io;
use std::net::SocketAddr;

use axum::{
    serve::ListenerExt,
    http::{Method, StatusCode, Uri},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::ShieldConfig;
use crate::lifecycle::Shutdown;
use crate::net::listener::LimitedListener;
use crate::protection::DdosProtection;

/// Protected HTTP server.
pub struct ShieldServer {
    config: ShieldConfig,
    protection: DdosProtection,
    app: Router,
}

impl ShieldServer {
    /// Serve the built-in application (health probe plus echo).
    pub fn new(config: ShieldConfig) -> Self {
        Self::with_app(config, default_app())
    }

    /// Serve `app`; the rate-limit tier of each request follows its path.
    pub fn with_app(config: ShieldConfig, app: Router) -> Self {
        let protection = DdosProtection::new(&config.protection);
        Self {
            config,
            protection,
            app,
        }
    }

    pub fn protection(&self) -> &DdosProtection {
        &self.protection
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.protection
            .protect(self.app.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Run until `shutdown` fires, then wait for in-flight work and background tasks.
    pub async fn run(self, listener: LimitedListener, shutdown: Shutdown) -> io::Result<()> {
        let tasks = self.protection.start(&shutdown);
        let connections = listener.counters();

        let admin = if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");

            let state = AdminState::new(self.protection.clone(), &self.config.admin.api_key)
                .with_connections(connections);
            let router = setup_admin_router(state);
            let stop = shutdown.wait();
            Some(tokio::spawn(async move {
                axum::serve(admin_listener, router)
                    .with_graceful_shutdown(stop)
                    .await
            }))
        } else {
            None
        };

        let addr = axum::serve::Listener::local_addr(&listener)?;
        tracing::info!(address = %addr, "HTTP server starting");

        // The tap exposes the peer address to ConnectInfo for any listener type.
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        let result = axum::serve(listener.tap_io(|_| {}), app)
            .with_graceful_shutdown(shutdown.wait())
            .await;

        shutdown.trigger();
        if let Some(handle) = admin {
            match handle.await {
                Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
                Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
                Ok(Ok(())) => {}
            }
        }
        tasks.join().await;

        tracing::info!("HTTP server stopped");
        result
    }
}

/// Health probe and a catch-all echo, used when no application router is supplied.
pub fn default_app() -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .fallback(echo)
}

async fn echo(method: Method, uri: Uri) -> impl IntoResponse {
    (StatusCode::OK, format!("{method} {}", uri.path()))
}
