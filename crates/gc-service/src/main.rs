//! Background garbage collector for the media cache
//!
//! Loads the cache configuration, then runs a collection pass every
//! `gc_sleep_seconds` until SIGTERM/SIGINT. With `--once` it runs a single
//! pass and prints the outcome as JSON on stdout.

mod cli;
mod logging;
mod service;

use crate::cli::Cli;
use crate::logging::LogFile;
use crate::service::{GcService, shutdown_signal};
use clap::Parser;
use media_cache::CacheConfig;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    let config = CacheConfig::load(cli.config.as_deref())?;

    let log_file = config.gc_log.enabled.then(|| LogFile {
        path: config.gc_log_path(),
        max_bytes: config.gc_log.max_bytes,
        backup_count: config.gc_log.backup_count,
    });
    logging::init_tracing(cli.level, cli.format, log_file.as_ref())?;

    info!(
        cache_dir = %config.cache_dir.display(),
        cache_size_bytes = config.cache_size_bytes,
        gc_sleep_seconds = config.gc_sleep_seconds,
        "Loaded cache configuration"
    );

    let service = GcService::new(Arc::new(config));
    if cli.once {
        let outcome = service.pass().await?;
        let json = serde_json::to_string_pretty(&outcome)
            .map_err(|e| miette::miette!("Failed to serialize outcome: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    service.run(shutdown_signal()).await;
    Ok(())
}
