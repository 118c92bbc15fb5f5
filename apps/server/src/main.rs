//! Omnicast Server - headless host for the Omnicast casting layer.
//!
//! Discovers DLNA and AirPlay receivers on the local network and exposes
//! device selection, playback control and live casting state over HTTP and
//! WebSocket.

mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use omnicast_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Omnicast Server - multi-protocol receiver discovery and casting control.
#[derive(Parser, Debug)]
#[command(name = "omnicast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "OMNICAST_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Disable AirPlay discovery and control.
    #[arg(long)]
    no_airplay: bool,

    /// Disable DLNA discovery and control.
    #[arg(long)]
    no_dlna: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Omnicast Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if args.no_airplay {
        config.airplay.enabled = false;
    }
    if args.no_dlna {
        config.dlna.enabled = false;
    }

    log::info!(
        "Configuration: bind_port={}, dlna={}, airplay={}, connect_timeout={}s, read_timeout={}s",
        config.bind_port,
        config.dlna.enabled,
        config.airplay.enabled,
        config.connect_timeout_secs,
        config.read_timeout_secs
    );

    // No vendor SDK is available to a headless host.
    let core_config = config.to_core_config();
    let services =
        bootstrap_services(&core_config, None).context("Failed to bootstrap services")?;

    services.orchestrator.start();
    log::info!("Discovery started");

    let app_state = AppState::from_services(&services);
    let bind_port = config.bind_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(app_state, bind_port).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Cancels the server's graceful shutdown as well
    services.shutdown();

    if let Err(e) = server_handle.await {
        log::warn!("Server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
