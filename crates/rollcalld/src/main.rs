use anyhow::{Context, Result};
use rollcalld::{spool, sweeper, AttendanceService, Config};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::load().context("loading configuration")?;
    tracing::info!(
        data_dir = %config.data_dir.display(),
        spool_dir = %config.spool_dir.display(),
        backend = ?config.backend,
        "configuration loaded"
    );

    let service = Arc::new(
        AttendanceService::open(&config)
            .await
            .context("starting attendance service")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = sweeper::spawn_sweeper(service.session_manager(), config.sweep_interval(), shutdown_rx.clone());
    let watcher = tokio::spawn(spool::watch_spool(
        Arc::clone(&service),
        config.spool_dir.clone(),
        config.poll_interval(),
        shutdown_rx,
    ));

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    let _ = shutdown_tx.send(true);
    watcher.await.context("spool watcher panicked")?;
    sweeper.await.context("sweeper panicked")?;

    if let Err(e) = service.session_manager().persist().await {
        tracing::error!(error = %e, "final session persist failed");
    }

    Ok(())
}
