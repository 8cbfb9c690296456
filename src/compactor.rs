use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::engine::Engine;

pub const CHECK_PERIOD: Duration = Duration::from_secs(60);

/// Compact the WAL whenever `threshold` appends have piled up since the last
/// compaction. Checked once per `period`.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_due(&engine, threshold).await {
            error!("WAL compaction failed: {e}");
        }
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> Result<bool, crate::engine::EngineError> {
    let pending = engine.wal_appends_since_compact().await?;
    if pending < threshold {
        debug!("compaction not due: {pending}/{threshold} appends");
        return Ok(false);
    }
    engine.compact_wal().await?;
    Ok(true)
}
