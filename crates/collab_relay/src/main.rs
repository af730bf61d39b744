//! Collab Relay - Main Entry Point
//!
//! Loads configuration, binds the relay and serves until Ctrl+C or SIGTERM.
//! A bind failure exits non-zero.

use anyhow::{Context, Result};
use colored::Colorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use collab_relay::*;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load configuration
    let config = Arc::new(Config::from_env().context("Failed to load configuration")?);

    // 2. Initialize logging and tracing
    logging::init(&config).context("Failed to initialize logging")?;

    logging::print_banner(&config);
    logging::log_config(&config);

    // 3. Initialize metrics registry
    let _metrics = metrics::init().context("Failed to initialize metrics")?;
    logging::log_status("📊", "Metrics", "READY", true);

    // 4. Bind the relay
    let shutdown = ShutdownCoordinator::new();
    let server = match RelayServer::bind(config.clone(), shutdown.clone()).await {
        Ok(server) => server,
        Err(e) => {
            logging::log_status("🌐", "Relay", "FAILED", false);
            return Err(e).context("Failed to start relay");
        }
    };

    let relay = server.relay();
    info!(addr = %server.local_addr(), "🚀 Relay ready");
    logging::log_status("🌐", "Relay", "LISTENING", true);

    let mut server_handle = tokio::spawn(server.serve());

    // 5. Wait for shutdown signal or an unexpected server exit
    tokio::select! {
        _ = shutdown.wait_for_signal() => {
            println!("\n{}", "⚠️  Received shutdown signal, closing connections...".bright_yellow());
        }
        result = &mut server_handle => {
            logging::log_status("🌐", "Relay", "STOPPED", false);
            return match result {
                Ok(Ok(())) => Err(anyhow::anyhow!("Relay server exited unexpectedly")),
                Ok(Err(e)) => Err(e).context("Relay server failed"),
                Err(e) => Err(e).context("Relay server task panicked"),
            };
        }
    }

    // 6. Graceful shutdown
    shutdown.shutdown_with_timeout(SHUTDOWN_TIMEOUT).await?;

    match tokio::time::timeout(SHUTDOWN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => logging::log_status("🌐", "Relay", "STOPPED", true),
        Ok(Ok(Err(e))) => error!(error = %e, "Relay server failed during shutdown"),
        Ok(Err(e)) => error!(error = %e, "Relay server task failed"),
        Err(_) => warn!("⚠️  Relay shutdown timeout"),
    }

    info!(
        remaining_connections = relay.connection_count(),
        "Relay stopped"
    );

    println!("\n{}", "👋 Collab relay stopped cleanly".bright_green().bold());

    Ok(())
}
