use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{now_ms, Engine};

/// Delete booking links whose expiry has passed. Returns how many went.
pub async fn reap_expired_links(engine: &Engine) -> usize {
    let mut reaped = 0;
    for token in engine.collect_expired_links(now_ms()) {
        match engine.delete_link(&token).await {
            Ok(()) => reaped += 1,
            // Deleted by an admin in the meantime
            Err(e) => debug!("reaper skip link: {e}"),
        }
    }
    if reaped > 0 {
        info!("reaped {reaped} expired booking links");
    }
    reaped
}

/// Background task that periodically prunes expired booking links.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        reap_expired_links(&engine).await;
    }
}

/// Compact the WAL once enough appends piled up. Returns whether it ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that compacts the WAL past `threshold` appends.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}
