use crate::error::SyncError;
use crate::sync::SyncReport;

/// Hooks for UI layers that want to reflect sync activity.
///
/// All methods default to no-ops; implementors override what they care
/// about. Callbacks run on the sync task, so they must not block.
pub trait SyncObserver: Send + Sync {
    fn on_sync_started(&self) {}

    fn on_sync_completed(&self, _report: &SyncReport) {}

    fn on_sync_failed(&self, _error: &SyncError) {}
}
