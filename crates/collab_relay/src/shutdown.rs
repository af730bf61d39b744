//! Graceful shutdown handler
//!
//! One broadcast channel fans the shutdown signal out to the HTTP server and
//! every open connection task. Connection tasks close their socket and run
//! their disconnect path when they see it.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Shutdown coordinator
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shutdown_tx: broadcast::Sender<()>,
    is_shutting_down: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);

        Self {
            shutdown_tx,
            is_shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if shutdown is in progress
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Get a shutdown receiver
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Resolves once shutdown has been initiated, including when it already
    /// was before the call.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.is_shutting_down() {
            return;
        }
        let _ = rx.recv().await;
    }

    /// Initiate graceful shutdown
    pub async fn shutdown(&self) -> Result<()> {
        if self
            .is_shutting_down
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Shutdown already in progress");
            return Ok(());
        }

        info!("Initiating graceful shutdown");

        // No receivers just means nothing is running yet
        if self.shutdown_tx.send(()).is_err() {
            info!("No tasks subscribed to shutdown");
        }

        Ok(())
    }

    /// Wait for Ctrl+C or SIGTERM
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C signal");
            }
            _ = terminate => {
                info!("Received SIGTERM signal");
            }
        }
    }

    /// Run shutdown with timeout
    pub async fn shutdown_with_timeout(&self, shutdown_timeout: Duration) -> Result<()> {
        match timeout(shutdown_timeout, self.shutdown()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timeout exceeded");
                anyhow::bail!("Shutdown timeout exceeded");
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_coordinator_creation() {
        let coordinator = ShutdownCoordinator::new();
        assert!(!coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_shutdown_signal() {
        let coordinator = ShutdownCoordinator::new();

        let mut rx = coordinator.subscribe();

        coordinator.shutdown().await.unwrap();

        assert!(rx.recv().await.is_ok());
        assert!(coordinator.is_shutting_down());
    }

    #[tokio::test]
    async fn test_wait_after_shutdown_returns() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown().await.unwrap();

        timeout(Duration::from_secs(1), coordinator.wait())
            .await
            .expect("wait should return once shutdown started");
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_ok() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.shutdown().await.unwrap();
        assert!(coordinator.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_with_timeout() {
        let coordinator = ShutdownCoordinator::new();

        let result = coordinator.shutdown_with_timeout(Duration::from_secs(1)).await;
        assert!(result.is_ok());
    }
}
