//! Bidirectional push/pull engine between local storage and the remote.
//!
//! One pass pushes every dirty record, applies the remote's resolved copies,
//! then pulls records other devices changed since the last pass and reconciles
//! them locally. At most one pass runs at a time per engine; transient
//! network failures are retried with exponential backoff.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use course_core::model::{ConflictStrategy, CourseOutline, DayId, SyncableRecord};
use course_core::{Clock, resolve};
use storage::Storage;

use crate::error::SyncError;
use crate::remote::{ConflictReport, RemoteProgress, RemoteRecord};
use crate::sync::events::SyncObserver;

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Total attempts per `sync` call, first try included.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles on each further retry.
    pub base_delay: Duration,
    /// Queue entries older than this are reaped after every pass.
    pub queue_retention: chrono::Duration,
    /// Cadence for `periodic_sync`.
    pub interval: Duration,
    pub strategy: ConflictStrategy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            queue_retention: chrono::Duration::days(7),
            interval: Duration::from_secs(300),
            strategy: ConflictStrategy::Merge,
        }
    }
}

/// Per-call options.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Push every stored record and pull the full remote set, ignoring the
    /// incremental `since` marker. For recovery flows.
    pub force_full: bool,
}

/// Outcome of one successful sync pass.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub pushed: usize,
    pub pulled: usize,
    pub conflicts: Vec<ConflictReport>,
    pub finished_at: DateTime<Utc>,
}

/// Drives push/pull passes against a `RemoteProgress` backend.
pub struct SyncEngine {
    storage: Storage,
    remote: Arc<dyn RemoteProgress>,
    outline: CourseOutline,
    config: SyncConfig,
    clock: Clock,
    online: AtomicBool,
    authenticated: AtomicBool,
    in_flight: AtomicBool,
    observers: Vec<Arc<dyn SyncObserver>>,
}

impl SyncEngine {
    #[must_use]
    pub fn new(
        storage: Storage,
        remote: Arc<dyn RemoteProgress>,
        outline: CourseOutline,
        config: SyncConfig,
    ) -> Self {
        Self {
            storage,
            remote,
            outline,
            config,
            clock: Clock::default(),
            online: AtomicBool::new(true),
            authenticated: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn SyncObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Feeds connectivity changes in from the platform's network monitor.
    ///
    /// Only stores the flag. After a reconnect the caller should follow up
    /// with a `sync()` call (or rely on `periodic_sync`) to flush edits
    /// made while offline.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    pub fn set_authenticated(&self, authenticated: bool) {
        self.authenticated.store(authenticated, Ordering::Release);
    }

    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    /// Runs one sync, retrying transient failures with exponential backoff.
    ///
    /// Guard failures (`NotAuthenticated`, `Offline`, `AlreadySyncing`)
    /// return immediately without touching storage or the retry counters.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the pass cannot complete; dirty flags are
    /// left set so the next pass retries the same records.
    pub async fn sync(&self, options: SyncOptions) -> Result<SyncReport, SyncError> {
        if !self.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }
        if !self.online.load(Ordering::Acquire) {
            return Err(SyncError::Offline);
        }
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            return Err(SyncError::AlreadySyncing);
        };

        for observer in &self.observers {
            observer.on_sync_started();
        }

        let mut attempt: u32 = 1;
        loop {
            match self.run_pass(options).await {
                Ok(report) => {
                    tracing::info!(
                        pushed = report.pushed,
                        pulled = report.pulled,
                        conflicts = report.conflicts.len(),
                        "sync pass complete"
                    );
                    for observer in &self.observers {
                        observer.on_sync_completed(&report);
                    }
                    return Ok(report);
                }
                Err(err) if err.is_transient() && attempt < self.config.max_attempts => {
                    let delay = self.config.base_delay * 2u32.pow(attempt - 1);
                    tracing::warn!(attempt, ?delay, error = %err, "sync attempt failed, retrying");
                    self.bump_queue_retries().await?;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    tracing::warn!(attempt, error = %err, "sync failed");
                    for observer in &self.observers {
                        observer.on_sync_failed(&err);
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn run_pass(&self, options: SyncOptions) -> Result<SyncReport, SyncError> {
        let client_id = self.storage.device_client_id().await?;

        let to_push = if options.force_full {
            self.storage.progress.all_days().await?
        } else {
            self.storage.progress.dirty_records().await?
        };

        let pushed = to_push.len();
        let mut conflicts = Vec::new();
        if !to_push.is_empty() {
            let wire: Vec<RemoteRecord> = to_push.iter().map(RemoteRecord::from_record).collect();
            let response = self.remote.push_batch(&wire, self.config.strategy).await?;
            conflicts = response.conflicts;

            let mut acknowledged: BTreeSet<DayId> = BTreeSet::new();
            for record in &response.records {
                let resolved = record
                    .to_progress(&self.outline)
                    .map_err(SyncError::InvalidRemote)?;
                let day = resolved.day();
                acknowledged.insert(day);

                // The push await is a suspension point: a facade write may
                // have landed since `to_push` was collected. Re-read the
                // record and merge instead of adopting the echo, so that
                // edit survives and stays dirty for the next pass.
                let sent = to_push.iter().find(|r| r.progress.day() == day);
                let current = self.storage.progress.get_day(day).await?;
                let stored = match (current, sent) {
                    (Some(local), Some(sent)) if local.progress != sent.progress => {
                        let merged =
                            resolve(&local.progress, &resolved, self.config.strategy);
                        let still_dirty = merged != resolved;
                        SyncableRecord {
                            progress: merged,
                            dirty: still_dirty,
                            sync_version: record.sync_version,
                            client_id: local.client_id,
                        }
                    }
                    _ => SyncableRecord::clean(resolved, record.sync_version, client_id.clone()),
                };
                self.storage.progress.put_day(&stored).await?;
            }
            // The remote echoes back only the records it resolved; days it
            // stayed silent on keep their dirty flag for the next pass.
            self.consume_queue_entries(&acknowledged).await?;
        }

        let since = if options.force_full {
            None
        } else {
            self.storage.session.last_sync_at().await?
        };
        let remote_records = self.remote.fetch_updated_since(since).await?;
        let pulled = remote_records.len();
        for wire in remote_records {
            self.apply_pulled(&wire).await?;
        }

        let now = self.clock.now();
        self.storage.session.set_last_sync_at(now).await?;
        let reaped = self
            .storage
            .queue
            .prune_older_than(now - self.config.queue_retention)
            .await?;
        if reaped > 0 {
            tracing::debug!(reaped, "pruned stale sync queue entries");
        }

        Ok(SyncReport {
            pushed,
            pulled,
            conflicts,
            finished_at: now,
        })
    }

    /// Reconciles one pulled record with whatever is stored locally.
    async fn apply_pulled(&self, wire: &RemoteRecord) -> Result<(), SyncError> {
        let remote_progress = wire
            .to_progress(&self.outline)
            .map_err(SyncError::InvalidRemote)?;
        let day = remote_progress.day();

        let stored = match self.storage.progress.get_day(day).await? {
            Some(local) if local.dirty => {
                let merged = resolve(&local.progress, &remote_progress, self.config.strategy);
                // If the merge kept anything the remote does not have yet,
                // the record stays dirty so the next pass pushes it.
                let still_dirty = merged != remote_progress;
                SyncableRecord {
                    progress: merged,
                    dirty: still_dirty,
                    sync_version: wire.sync_version.max(local.sync_version),
                    client_id: local.client_id,
                }
            }
            Some(local) if wire.sync_version <= local.sync_version => return Ok(()),
            Some(local) => SyncableRecord::clean(remote_progress, wire.sync_version, local.client_id),
            None => {
                let client_id = self.storage.device_client_id().await?;
                SyncableRecord::clean(remote_progress, wire.sync_version, client_id)
            }
        };
        self.storage.progress.put_day(&stored).await?;
        Ok(())
    }

    async fn consume_queue_entries(&self, days: &BTreeSet<DayId>) -> Result<(), SyncError> {
        let pending = self.storage.queue.pending().await?;
        let ids: Vec<i64> = pending
            .iter()
            .filter(|entry| days.contains(&entry.day))
            .filter_map(|entry| entry.id)
            .collect();
        if !ids.is_empty() {
            self.storage.queue.remove(&ids).await?;
        }
        Ok(())
    }

    async fn bump_queue_retries(&self) -> Result<(), SyncError> {
        let pending = self.storage.queue.pending().await?;
        for entry in pending {
            if let Some(id) = entry.id {
                self.storage.queue.mark_retry(id).await?;
            }
        }
        Ok(())
    }
}

/// Releases the in-flight flag when the pass ends, panic or not.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_policy() {
        let config = SyncConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.queue_retention, chrono::Duration::days(7));
        assert_eq!(config.strategy, ConflictStrategy::Merge);
    }

    #[test]
    fn in_flight_guard_is_exclusive_and_releases_on_drop() {
        let flag = AtomicBool::new(false);
        let guard = InFlightGuard::acquire(&flag).expect("first acquire");
        assert!(InFlightGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(InFlightGuard::acquire(&flag).is_some());
    }
}
