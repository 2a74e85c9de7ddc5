//! TCP listener for incoming client connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, Semaphore};

use crate::config::Config;
use crate::error::Result;
use crate::server::session::Session;

/// Listener statistics
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections rejected due to limit
    pub connections_rejected: AtomicU64,
}

/// TCP listener that accepts incoming client connections
pub struct Listener {
    /// TCP listener
    listener: TcpListener,
    /// Configuration
    config: Arc<Config>,
    /// Statistics
    stats: Arc<ListenerStats>,
    /// Shutdown signal receiver
    shutdown_rx: broadcast::Receiver<()>,
    /// Connection limit semaphore (None = unlimited)
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl Listener {
    /// Bind to the configured address and create a new listener
    pub async fn bind(config: Arc<Config>, shutdown_rx: broadcast::Receiver<()>) -> Result<Self> {
        let addr = format!(
            "{}:{}",
            config.server.listen_address, config.server.listen_port
        );

        let listener = TcpListener::bind(&addr).await?;

        // Create connection limit semaphore (0 = unlimited)
        let connection_semaphore = if config.server.max_connections > 0 {
            info!(
                "Listening on {} (max {} connections)",
                addr, config.server.max_connections
            );
            Some(Arc::new(Semaphore::new(config.server.max_connections)))
        } else {
            info!("Listening on {} (unlimited connections)", addr);
            None
        };

        Ok(Self {
            listener,
            config,
            stats: Arc::new(ListenerStats::default()),
            shutdown_rx,
            connection_semaphore,
        })
    }

    /// Get listener statistics
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Get the local address the listener is bound to.
    ///
    /// This is useful when binding to port 0 to get an OS-assigned port.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop
    pub async fn run(mut self) -> Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, client_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };

                    // Enforce the connection limit without blocking the loop
                    let permit = match &self.connection_semaphore {
                        Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                            Ok(permit) => Some(permit),
                            Err(_) => {
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                warn!("Connection from {} rejected: limit reached", client_addr);
                                continue;
                            }
                        },
                        None => None,
                    };

                    self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
                    self.stats.connections_active.fetch_add(1, Ordering::Relaxed);
                    debug!("Accepted connection from {}", client_addr);

                    let config = Arc::clone(&self.config);
                    let stats = Arc::clone(&self.stats);
                    tokio::spawn(async move {
                        let session = Session::new(stream, client_addr, config);
                        if let Err(e) = session.handle().await {
                            warn!("Session {} ended with error: {}", client_addr, e);
                        }
                        stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                        drop(permit);
                    });
                }
                _ = self.shutdown_rx.recv() => {
                    info!("Listener shutting down");
                    return Ok(());
                }
            }
        }
    }
}
