//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM and SIGINT and tears down the named contexts and the
//! root container within the configured timeout.

use crate::context::{Container, NamedContextFactory};
use crate::Result;
use anyhow::Context;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Upper bound for context teardown
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_tx,
            timeout,
        }
    }

    /// Get a shutdown receiver for components to listen for shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Resolves once shutdown has been signalled
    pub fn signalled(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.subscribe();
        async move {
            let _ = rx.recv().await;
        }
    }

    /// Signal shutdown to every subscriber
    pub fn trigger(&self) {
        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No shutdown subscribers: {}", e);
        }
    }

    /// Start listening for shutdown signals (SIGTERM, SIGINT)
    pub async fn listen_for_signals(&self) -> Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                .context("Failed to install SIGTERM handler")?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
                .context("Failed to install SIGINT handler")?;

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                }
                _ = signal::ctrl_c() => {
                    info!("Received Ctrl+C, initiating graceful shutdown");
                }
            }
        }

        #[cfg(windows)]
        {
            signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Close every named context, then the root container
    pub async fn shutdown_contexts(
        &self,
        factory: Arc<NamedContextFactory>,
        root: Arc<Container>,
    ) -> Result<()> {
        let start_time = Instant::now();
        info!(
            contexts = factory.context_names().len(),
            "Closing named contexts (timeout: {:?})", self.timeout
        );

        let teardown = tokio::task::spawn_blocking(move || {
            factory.shutdown();
            root.close()
        });

        match tokio::time::timeout(self.timeout, teardown).await {
            Ok(Ok(Ok(()))) => {
                info!("All contexts closed in {:?}", start_time.elapsed());
                Ok(())
            }
            Ok(Ok(Err(e))) => {
                warn!("Root container closed with errors: {:#}", e);
                Err(e)
            }
            Ok(Err(e)) => {
                error!("Context teardown task failed: {}", e);
                Err(anyhow::anyhow!("Context teardown task failed: {}", e))
            }
            Err(_) => {
                warn!("Shutdown timeout reached after {:?} with contexts still closing", start_time.elapsed());
                Err(anyhow::anyhow!("Context teardown timed out after {:?}", self.timeout))
            }
        }
    }
}
