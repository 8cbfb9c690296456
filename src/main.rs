use std::sync::Arc;

use tracing::info;

use hallslot::compactor::{run_compactor, CHECK_PERIOD};
use hallslot::config::Config;
use hallslot::engine::Engine;
use hallslot::notify::NotifyHub;
use hallslot::refresh::{run_invalidator, run_refresher, SnapshotCache};
use hallslot::repository::SlotRepository;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let cfg = Config::from_env();
    hallslot::observability::init(cfg.metrics_port)?;

    std::fs::create_dir_all(&cfg.data_dir)?;

    let notify = Arc::new(NotifyHub::new());
    let engine = Arc::new(Engine::new(cfg.wal_path(), notify.clone())?.with_lock_timeout(cfg.lock_timeout));
    let cache = Arc::new(SnapshotCache::new(cfg.refresh_period));

    let repo: Arc<dyn SlotRepository> = engine.clone();
    let refresher = tokio::spawn(run_refresher(repo, cache.clone(), cfg.refresh_period));
    let invalidator = tokio::spawn(run_invalidator(cache.clone(), notify.subscribe_all()));
    let compactor = tokio::spawn(run_compactor(engine.clone(), cfg.compact_threshold, CHECK_PERIOD));

    info!("hallslot running");
    info!("  data_dir: {}", cfg.data_dir.display());
    info!("  lock_timeout: {:?}", cfg.lock_timeout);
    info!("  refresh_period: {:?}", cfg.refresh_period);
    info!(
        "  metrics: {}",
        cfg.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );

    shutdown_signal().await?;
    info!("shutdown signal received");

    refresher.abort();
    invalidator.abort();
    compactor.abort();

    // Leave a compact log behind so the next start replays quickly.
    engine.compact_wal().await?;
    info!("hallslot stopped");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = tokio::signal::ctrl_c() => r,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
