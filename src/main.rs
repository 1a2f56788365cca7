//! APM event intake server.
//!
//! # Architecture Overview
//!
//! ```text
//!     Agent / Browser          ┌──────────────────────────────────────────────────┐
//!     ─────────────────────────┼─▶ http server ─▶ route table ─▶ middleware chain │
//!                              │                                      │           │
//!                              │                                      ▼           │
//!                              │                              intake handler      │
//!                              │                         (decode, rate limit,     │
//!                              │                          stream processing)      │
//!                              │                                      │           │
//!                              │                                      ▼           │
//!                              │                           publish queue ─▶ consumer
//!                              │                                                  │
//!                              │  config · observability · security · lifecycle   │
//!                              └──────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use apm_intake::api::Dependencies;
use apm_intake::config::{load_config, ServerConfig};
use apm_intake::lifecycle::{shutdown_signal, Shutdown};
use apm_intake::observability::{logging, metrics};
use apm_intake::publish::{run_consumer, QueuePublisher};
use apm_intake::HttpServer;

#[derive(Parser)]
#[command(name = "apm-intake")]
#[command(about = "Intake server for APM agent events", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "apm-intake starting");

    // The recorder must be in place before counter registries are created.
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        rum_enabled = config.rum.enabled,
        agent_config_enabled = config.agent_config.enabled,
        auth_enabled = !config.secret_token.is_empty(),
        "Configuration loaded"
    );

    let shutdown = Shutdown::new(Duration::from_secs(config.timeouts.shutdown_secs));
    let (publisher, queue) = QueuePublisher::new(&config.queue);
    let publisher = Arc::new(publisher);
    let consumer = tokio::spawn(run_consumer(queue, shutdown.subscribe()));

    let server = HttpServer::new(&config, Dependencies::new(publisher.clone()))?;
    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = tokio::spawn(server.run(listener, shutdown.subscribe()));

    shutdown_signal().await;
    publisher.stop();
    shutdown.trigger();

    match shutdown.finish(server).await {
        Some(Ok(Err(e))) => tracing::error!(error = %e, "HTTP server failed"),
        Some(Err(e)) => tracing::error!(error = %e, "HTTP server task panicked"),
        _ => {}
    }
    if let Some(Ok(stats)) = shutdown.finish(consumer).await {
        tracing::info!(batches = stats.batches, events = stats.events, "Publish queue closed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
