use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use roombook::clock::SystemClock;
use roombook::config::Config;
use roombook::directory::{RoomDirectory, StaticDirectory, UserDirectory};
use roombook::engine::{Collaborators, Engine};
use roombook::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env();
    roombook::observability::init(config.metrics_port)?;

    let directory = match &config.directory {
        Some(path) => StaticDirectory::load(path)?,
        None => {
            info!("no ROOMBOOK_DIRECTORY set, using the built-in directory");
            StaticDirectory::seeded()
        }
    };
    let directory = Arc::new(directory);

    std::fs::create_dir_all(&config.data_dir)?;
    let wal_path = config.wal_path();
    let engine = Engine::new(wal_path.clone(), Collaborators::in_memory(directory.clone(), Arc::new(SystemClock)))?
        .with_reminder_tolerance(config.reminder_tolerance);
    let engine = Arc::new(engine);

    info!("roombook started");
    info!("  wal: {}", wal_path.display());
    info!("  rooms: {}, users: {}", directory.list_rooms().len(), directory.list_users().len());
    info!("  reminder sweep every {:?}, tolerance {}s", config.reminder_interval, config.reminder_tolerance.num_seconds());
    info!("  compact threshold: {}", config.compact_threshold);
    info!("  metrics: {}", config.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    let sweep = tokio::spawn(sweeper::run_reminder_sweeper(engine.clone(), config.reminder_interval));
    let compact = tokio::spawn(sweeper::run_compactor(
        engine.clone(),
        config.compact_threshold,
        sweeper::COMPACT_CHECK_PERIOD,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");
    sweep.abort();
    compact.abort();

    // Leave a compact log behind for the next start.
    if let Err(e) = engine.compact_wal().await {
        tracing::warn!("final compaction failed: {e}");
    }
    info!("roombook stopped");
    Ok(())
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        sigterm.recv().await;
        Ok::<(), std::io::Error>(())
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<()>>();

    tokio::select! {
        r = tokio::signal::ctrl_c() => r,
        r = terminate => r,
    }
}
