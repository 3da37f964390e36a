//! DDoS shield server.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────────┐
//!                 │                        SHIELD                            │
//!   Client        │  ┌──────────┐   ┌──────────┐   ┌────────────────────┐   │
//!   ──────────────┼─▶│   net    │──▶│   http   │──▶│     protection     │   │
//!                 │  │ listener │   │  server  │   │ blocker → breaker  │   │
//!                 │  └──────────┘   └──────────┘   │ → fingerprint      │   │
//!                 │                                │ → rate limit       │   │
//!                 │                                └─────────┬──────────┘   │
//!                 │                                          ▼              │
//!                 │                                    application          │
//!                 │                                                          │
//!                 │  config · lifecycle · observability · admin API          │
//!                 └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use ddos_shield::config::load_config;
use ddos_shield::lifecycle::signals::shutdown_signal;
use ddos_shield::lifecycle::Shutdown;
use ddos_shield::net::LimitedListener;
use ddos_shield::observability::{logging, metrics};
use ddos_shield::ShieldServer;

#[derive(Parser)]
#[command(name = "ddos-shield", version, about = "Adaptive request-admission server")]
struct Args {
    /// Path to a TOML config file. Environment variables override it.
    #[arg(short, long, env = "SHIELD_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    logging::init_logging(&config.observability.log_level)?;
    tracing::info!("ddos-shield v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => {
                if let Err(e) = metrics::init_metrics(addr) {
                    tracing::error!(error = %e, "Failed to start metrics endpoint");
                }
            }
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = LimitedListener::bind(&config.listener).await?;

    let shutdown = Shutdown::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.trigger();
    });

    ShieldServer::new(config).run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
