//! Graceful Shutdown Handling
//!
//! Listens for SIGTERM/SIGINT, broadcasts shutdown to the rest of the
//! process, then unbinds listeners and drains the dispatch lane within a
//! bounded time.

use std::time::{Duration, Instant};

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::pipeline::PipelineBuilder;
use crate::transport::Listener;

/// Shutdown coordinator that manages graceful shutdown process
pub struct ShutdownCoordinator {
    /// Broadcast sender for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Shutdown timeout duration
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

    /// Broadcast shutdown without waiting for a signal.
    pub fn trigger(&self) {
        if self.shutdown_tx.send(()).is_err() {
            debug!("Shutdown broadcast had no subscribers");
        }
    }

    /// Wait for SIGTERM, SIGINT or Ctrl+C, then broadcast shutdown.
    pub async fn listen_for_signals(&self) -> std::io::Result<()> {
        info!("Starting shutdown signal listener");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;

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
            signal::ctrl_c().await?;
            info!("Received Ctrl+C, initiating graceful shutdown");
        }

        self.trigger();
        Ok(())
    }

    /// Unbind `listener`, then let the dispatch lane finish its backlog. If
    /// the lane is still busy when the timeout expires, its backlog is dropped.
    ///
    /// Returns `true` if everything finished in time.
    pub async fn shutdown_acceptor(&self, listener: &Listener, pipeline: &PipelineBuilder) -> bool {
        info!(
            "Initiating graceful shutdown (timeout: {:?}, open sessions: {})",
            self.timeout,
            listener.sessions()
        );
        let start_time = Instant::now();

        listener.unbind().await;
        pipeline.shutdown_dispatch();

        let remaining = self.timeout.saturating_sub(start_time.elapsed());
        match tokio::time::timeout(remaining, pipeline.dispatch_terminated()).await {
            Ok(()) => {
                info!("Shutdown completed in {:?}", start_time.elapsed());
                true
            }
            Err(_) => {
                warn!(
                    "Shutdown timeout reached after {:?}, dropping queued writes",
                    start_time.elapsed()
                );
                pipeline.shutdown_dispatch_now();
                false
            }
        }
    }
}
