//! The collection loop
//!
//! One pass per interval until shutdown. A pass runs on the blocking pool,
//! so an error or a panic inside it ends that pass only.

use media_cache::{CacheConfig, GarbageCollector, GcOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Periodic garbage collection over one cache directory
#[derive(Debug, Clone)]
pub struct GcService {
    collector: GarbageCollector,
    interval: Duration,
}

impl GcService {
    /// Service for `config`, sleeping `config.gc_sleep()` between passes
    pub fn new(config: Arc<CacheConfig>) -> Self {
        let interval = config.gc_sleep();
        Self {
            collector: GarbageCollector::new(config),
            interval,
        }
    }

    /// Run one pass, surfacing its error or panic.
    pub async fn pass(&self) -> miette::Result<GcOutcome> {
        let collector = self.collector.clone();
        match tokio::task::spawn_blocking(move || collector.run()).await {
            Ok(result) => result.map_err(miette::Report::new),
            Err(e) if e.is_panic() => Err(miette::miette!("Garbage collection pass panicked")),
            Err(e) => Err(miette::miette!("Garbage collection pass was cancelled: {e}")),
        }
    }

    /// Run one pass, logging any failure.
    pub async fn tick(&self) -> Option<GcOutcome> {
        match self.pass().await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = ?e, "Garbage collection pass failed");
                None
            }
        }
    }

    /// Collect until `shutdown` resolves. The pass in flight is allowed to
    /// finish.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(interval_secs = self.interval.as_secs(), "GC service started");
        tokio::pin!(shutdown);
        loop {
            self.tick().await;
            tokio::select! {
                () = &mut shutdown => break,
                () = tokio::time::sleep(self.interval) => {}
            }
        }
        info!("GC service stopped");
    }
}

/// Resolve on SIGTERM or SIGINT.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT, shutting down"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for Ctrl+C; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
