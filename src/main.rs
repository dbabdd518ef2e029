//! simbridge - WebSocket bridge for a TCP simulation engine
//!
//! Accepts WebSocket clients, drives a simulation session per client
//! against the backend engine, and publishes completed run results.
//!
//! Module structure:
//! - `domain/` - Core types (commands, frames, parameters)
//! - `io/` - External interfaces (gateway, backend, telemetry, results)
//! - `services/` - Session state machine
//! - `infra/` - Infrastructure (config, metrics)

use clap::Parser;
use simbridge::infra::{Config, Metrics};
use simbridge::io::{Gateway, JsonlResultSink, ResultSink};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// simbridge - simulation session bridge
#[derive(Parser, Debug)]
#[command(name = "simbridge", version, about)]
struct Args {
    /// Path to TOML configuration file; falls back to the CONFIG_FILE
    /// environment variable, then config/dev.toml
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for full frame visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = env!("GIT_HASH"), "simbridge starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| {
        let argv: Vec<String> = std::env::args().collect();
        Config::resolve_config_path(&argv)
    });
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        gateway_bind = %config.gateway_bind(),
        gateway_port = %config.gateway_port(),
        backend_host = %config.backend_host(),
        backend_port = %config.backend_port(),
        backend_warmup_secs = %config.backend_warmup().as_secs(),
        telemetry_enabled = %config.telemetry_enabled(),
        telemetry_topic = %config.telemetry_topic(),
        results_file = %config.results_file(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let sink: Arc<dyn ResultSink> = Arc::new(JsonlResultSink::new(config.results_file()));

    // Start MQTT telemetry listener
    let telemetry_config = config.clone();
    let telemetry_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) =
            simbridge::io::telemetry::start_telemetry_listener(&telemetry_config, telemetry_shutdown)
                .await
        {
            tracing::error!(error = %e, "telemetry listener error");
        }
    });

    // Start metrics reporter (lock-free reads with full summary)
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            let summary = metrics_clone.report();
            summary.log();
        }
    });

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run gateway - accepts clients until shutdown
    let gateway = Gateway::bind(config, metrics, sink).await?;
    gateway.run(shutdown_rx).await;

    info!("simbridge shutdown complete");
    Ok(())
}
