//! pgcred-proxy - Transparent PostgreSQL proxy with credential substitution
//!
//! This binary runs a standalone proxy that:
//! - Accepts PostgreSQL client connections with any login identity
//! - Authenticates to the real server with configured service credentials
//! - Negotiates server-side SSL according to policy
//! - Relays all traffic transparently after authentication

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use pgcred_proxy::{config, Listener, Result};

#[derive(Parser)]
#[command(name = "pgcred-proxy")]
#[command(version)]
#[command(about = "Transparent PostgreSQL proxy with credential substitution")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Override listen address
    #[arg(long)]
    listen_address: Option<String>,

    /// Override listen port
    #[arg(long)]
    listen_port: Option<u16>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Priority: --verbose flag, then RUST_LOG env var, then the config default
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_default()
    };

    // Load configuration
    let mut config = config::load_config(&cli.config)?;

    let log_level = if log_level.is_empty() {
        config.logging.level.clone()
    } else {
        log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(log_level.as_str())
        .init();

    info!("Starting pgcred-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {:?}", cli.config);

    // Apply CLI overrides
    if let Some(addr) = cli.listen_address {
        config.server.listen_address = addr;
    }
    if let Some(port) = cli.listen_port {
        config.server.listen_port = port;
    }

    let config = Arc::new(config);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let listener = Listener::bind(Arc::clone(&config), shutdown_rx).await?;
    let stats = listener.stats();

    info!(
        "Proxy ready: listening on {}:{} -> {}:{} (ssl {})",
        config.server.listen_address,
        config.server.listen_port,
        config.target.host,
        config.target.port,
        if config.target.tls.required {
            "required"
        } else {
            "optional"
        }
    );

    // Spawn the listener task
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run().await {
            error!("Listener error: {}", e);
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Send shutdown signal
    let _ = shutdown_tx.send(());

    // Wait for listener to finish
    let _ = listener_handle.await;

    info!(
        "Shutdown complete. Total connections handled: {}",
        stats
            .connections_accepted
            .load(std::sync::atomic::Ordering::Relaxed)
    );

    Ok(())
}
