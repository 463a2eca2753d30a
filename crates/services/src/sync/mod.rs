mod engine;
mod events;

pub use engine::{SyncConfig, SyncEngine, SyncOptions, SyncReport};
pub use events::SyncObserver;

use std::sync::Arc;
use std::time::Duration;

/// Runs background syncs on a fixed cadence until the task is dropped.
///
/// Guard outcomes (offline, signed out, a pass already running) are normal
/// in the background and logged at debug; real failures are logged at warn
/// and the loop keeps going.
pub async fn periodic_sync(engine: Arc<SyncEngine>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match engine.sync(SyncOptions::default()).await {
            Ok(report) => {
                tracing::debug!(pushed = report.pushed, pulled = report.pulled, "periodic sync");
            }
            Err(err) if err.is_guard() => {
                tracing::debug!(error = %err, "periodic sync skipped");
            }
            Err(err) => {
                tracing::warn!(error = %err, "periodic sync failed");
            }
        }
    }
}
