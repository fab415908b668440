//! Real-time messaging broker.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌───────────────────────────────────────────────┐
//!                         │                    BROKER                     │
//!                         │                                               │
//!   Client connection     │  ┌──────────┐   http   ┌──────────────────┐   │
//!   ──────────────────────┼─▶│   net    │─────────▶│ http (axum)      │   │
//!                         │  │   mux    │          │ /health /status  │   │
//!                         │  │ listener │          │ WebSocket ───┐   │   │
//!                         │  └────┬─────┘          └──────────────┼───┘   │
//!                         │       │ tcp                           │       │
//!                         │       ▼                               ▼       │
//!                         │  ┌──────────────┐          ┌──────────────┐   │
//!                         │  │ broker::tcp  │─────────▶│ broker::conn │   │
//!                         │  └──────────────┘          └──────┬───────┘   │
//!                         │                                   │           │
//!                         │                                   ▼           │
//!                         │                      ┌──────────────────────┐ │
//!                         │                      │ Service: Counters +  │ │
//!                         │                      │ TopicObserver        │ │
//!                         │                      └──────────────────────┘ │
//!                         │                                               │
//!                         │  config · lifecycle · observability           │
//!                         └───────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use rtms_broker::broker::{LoggingObserver, Service, ServiceError};
use rtms_broker::config::loader::{default_config, load_config};
use rtms_broker::lifecycle::signals::wait_for_signal;
use rtms_broker::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "rtms-broker")]
#[command(about = "Real-time messaging broker", long_about = None)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overriding the config file.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => default_config()?,
    };

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&config.observability.log_level);
    logging::init(log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rtms-broker starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        read_timeout_ms = config.listener.read_timeout_ms,
        inactivity_secs = config.connection.inactivity_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let service = Service::new(config, Arc::new(LoggingObserver));
    tokio::spawn(wait_for_signal(service.shutdown().clone()));

    service.listen().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
