use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that compacts a club's WAL once `threshold` records have
/// been appended since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// Returns true if a compaction ran and succeeded.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = match engine.wal_appends_since_compact().await {
        Ok(n) => n,
        Err(e) => {
            warn!("club {}: cannot read WAL append count: {e}", engine.club.id);
            return false;
        }
    };
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("club {}: compacted WAL after {appends} appends", engine.club.id);
            true
        }
        Err(e) => {
            error!("club {}: WAL compaction failed: {e}", engine.club.id);
            false
        }
    }
}
