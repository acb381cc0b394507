use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use vendra_catalog::SyncService;
use vendra_dispatch::DispatchEngine;

/// Drains due retries and status checks on a fixed cadence.
pub async fn start_retry_pump(engine: Arc<DispatchEngine>, interval: Duration, batch_size: i64) {
    info!("Retry pump started, interval {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        match engine.run_due(batch_size).await {
            Ok(0) => {}
            Ok(processed) => info!("Retry pump processed {} due orders", processed),
            Err(err) => error!("Retry pump pass failed: {}", err),
        }
    }
}

/// Refreshes balance and catalog snapshots for every enabled integration.
pub async fn start_sync_scheduler(sync: Arc<SyncService>, interval: Duration) {
    info!("Snapshot sync scheduler started, interval {:?}", interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        sync.clone().sync_all().await;
    }
}
