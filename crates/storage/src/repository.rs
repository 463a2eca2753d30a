use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{ClientId, DayId, SessionState, SyncQueueEntry, SyncableRecord};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
///
/// Every storage operation is fallible; callers must never assume a write
/// succeeded. Reads of absent records return defaults instead of failing.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stored data is corrupted: {0}")]
    Corrupted(String),
}

/// Durable store of per-day progress records wrapped in their sync envelope.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch one day's record, or `None` if the day has never been touched.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure; absence is not an error.
    async fn get_day(&self, day: DayId) -> Result<Option<SyncableRecord>, StorageError>;

    /// Upsert a full record. Writes are atomic at the record level; no
    /// reader observes a partially written record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the record cannot be stored.
    async fn put_day(&self, record: &SyncableRecord) -> Result<(), StorageError>;

    /// All stored records, ordered by day.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn all_days(&self) -> Result<Vec<SyncableRecord>, StorageError>;

    /// Records with local mutations not yet acknowledged by the remote.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn dirty_records(&self) -> Result<Vec<SyncableRecord>, StorageError>;

    /// Wipe all progress records atomically.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure; on failure no record has
    /// been removed.
    async fn clear(&self) -> Result<(), StorageError>;
}

/// Queue of pending mutations awaiting a sync pass.
#[async_trait]
pub trait SyncQueueRepository: Send + Sync {
    /// Append an entry; returns its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the entry cannot be stored.
    async fn enqueue(&self, entry: &SyncQueueEntry) -> Result<i64, StorageError>;

    /// All entries in enqueue order.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn pending(&self) -> Result<Vec<SyncQueueEntry>, StorageError>;

    /// Bump the retry counter of one entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn mark_retry(&self, id: i64) -> Result<(), StorageError>;

    /// Remove consumed entries.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn remove(&self, ids: &[i64]) -> Result<(), StorageError>;

    /// Remove every entry.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn clear(&self) -> Result<(), StorageError>;

    /// Reap entries enqueued before `cutoff`, successful or not, to bound
    /// storage growth. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;
}

/// Session UI state plus the persisted sync markers.
#[async_trait]
pub trait SessionStateRepository: Send + Sync {
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure; absence is `None`.
    async fn get_session_state(&self) -> Result<Option<SessionState>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` if the state cannot be stored.
    async fn put_session_state(&self, state: &SessionState) -> Result<(), StorageError>;

    /// Timestamp of the last successful sync pass, surviving restarts.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Whether the one-time legacy migration has completed.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn has_migrated(&self) -> Result<bool, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn set_migrated(&self, migrated: bool) -> Result<(), StorageError>;

    /// Raw legacy payload backed up before migration.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn legacy_backup(&self) -> Result<Option<String>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn set_legacy_backup(&self, blob: &str) -> Result<(), StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn client_id(&self) -> Result<Option<ClientId>, StorageError>;

    /// # Errors
    ///
    /// Returns `StorageError` on storage failure.
    async fn set_client_id(&self, id: &ClientId) -> Result<(), StorageError>;
}

/// Simple in-memory implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    days: Arc<Mutex<HashMap<DayId, SyncableRecord>>>,
    queue: Arc<Mutex<QueueState>>,
    session: Arc<Mutex<Option<SessionState>>>,
    meta: Arc<Mutex<HashMap<&'static str, String>>>,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<SyncQueueEntry>,
    next_id: i64,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn meta_get(&self, key: &'static str) -> Result<Option<String>, StorageError> {
        let guard = self
            .meta
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn meta_set(&self, key: &'static str, value: String) -> Result<(), StorageError> {
        let mut guard = self
            .meta
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(key, value);
        Ok(())
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_day(&self, day: DayId) -> Result<Option<SyncableRecord>, StorageError> {
        let guard = self
            .days
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&day).cloned())
    }

    async fn put_day(&self, record: &SyncableRecord) -> Result<(), StorageError> {
        let mut guard = self
            .days
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(record.progress.day(), record.clone());
        Ok(())
    }

    async fn all_days(&self) -> Result<Vec<SyncableRecord>, StorageError> {
        let guard = self
            .days
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut records: Vec<_> = guard.values().cloned().collect();
        records.sort_by_key(|r| r.progress.day());
        Ok(records)
    }

    async fn dirty_records(&self) -> Result<Vec<SyncableRecord>, StorageError> {
        let mut records = self.all_days().await?;
        records.retain(|r| r.dirty);
        Ok(records)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut guard = self
            .days
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.clear();
        Ok(())
    }
}

#[async_trait]
impl SyncQueueRepository for InMemoryRepository {
    async fn enqueue(&self, entry: &SyncQueueEntry) -> Result<i64, StorageError> {
        let mut guard = self
            .queue
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.next_id += 1;
        let id = guard.next_id;
        let mut stored = entry.clone();
        stored.id = Some(id);
        guard.entries.push(stored);
        Ok(id)
    }

    async fn pending(&self) -> Result<Vec<SyncQueueEntry>, StorageError> {
        let guard = self
            .queue
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.entries.clone())
    }

    async fn mark_retry(&self, id: i64) -> Result<(), StorageError> {
        let mut guard = self
            .queue
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        for entry in &mut guard.entries {
            if entry.id == Some(id) {
                entry.retries += 1;
            }
        }
        Ok(())
    }

    async fn remove(&self, ids: &[i64]) -> Result<(), StorageError> {
        let mut guard = self
            .queue
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .entries
            .retain(|e| e.id.is_none_or(|id| !ids.contains(&id)));
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut guard = self
            .queue
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.entries.clear();
        Ok(())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut guard = self
            .queue
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let before = guard.entries.len();
        guard.entries.retain(|e| e.enqueued_at >= cutoff);
        Ok((before - guard.entries.len()) as u64)
    }
}

#[async_trait]
impl SessionStateRepository for InMemoryRepository {
    async fn get_session_state(&self) -> Result<Option<SessionState>, StorageError> {
        let guard = self
            .session
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn put_session_state(&self, state: &SessionState) -> Result<(), StorageError> {
        let mut guard = self
            .session
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *guard = Some(state.clone());
        Ok(())
    }

    async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.meta_get("last_sync_at")?
            .map(|raw| {
                raw.parse::<DateTime<Utc>>()
                    .map_err(|e| StorageError::Corrupted(e.to_string()))
            })
            .transpose()
    }

    async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.meta_set("last_sync_at", at.to_rfc3339())
    }

    async fn has_migrated(&self) -> Result<bool, StorageError> {
        Ok(self.meta_get("migrated")?.as_deref() == Some("true"))
    }

    async fn set_migrated(&self, migrated: bool) -> Result<(), StorageError> {
        self.meta_set("migrated", migrated.to_string())
    }

    async fn legacy_backup(&self) -> Result<Option<String>, StorageError> {
        self.meta_get("legacy_backup")
    }

    async fn set_legacy_backup(&self, blob: &str) -> Result<(), StorageError> {
        self.meta_set("legacy_backup", blob.to_owned())
    }

    async fn client_id(&self) -> Result<Option<ClientId>, StorageError> {
        Ok(self.meta_get("client_id")?.map(ClientId::new))
    }

    async fn set_client_id(&self, id: &ClientId) -> Result<(), StorageError> {
        self.meta_set("client_id", id.as_str().to_owned())
    }
}

/// Aggregates the three repositories behind trait objects for easy backend
/// swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
    pub queue: Arc<dyn SyncQueueRepository>,
    pub session: Arc<dyn SessionStateRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let queue: Arc<dyn SyncQueueRepository> = Arc::new(repo.clone());
        let session: Arc<dyn SessionStateRepository> = Arc::new(repo);
        Self {
            progress,
            queue,
            session,
        }
    }

    /// Returns this device's stable client id, generating and persisting one
    /// on first use.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the id cannot be read or stored.
    pub async fn device_client_id(&self) -> Result<ClientId, StorageError> {
        if let Some(id) = self.session.client_id().await? {
            return Ok(id);
        }
        let id = ClientId::generate();
        self.session.set_client_id(&id).await?;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use course_core::model::{DayProgress, SyncAction};
    use course_core::time::fixed_now;

    fn day(n: u8) -> DayId {
        DayId::new(n).unwrap()
    }

    fn dirty_record(n: u8) -> SyncableRecord {
        let mut progress = DayProgress::new(day(n), fixed_now());
        progress.set_section("s1", true, 3, fixed_now());
        SyncableRecord::new_dirty(progress, ClientId::new("device-a"))
    }

    #[tokio::test]
    async fn upsert_and_dirty_query() {
        let repo = InMemoryRepository::new();
        repo.put_day(&dirty_record(1)).await.unwrap();

        let mut clean = dirty_record(2);
        clean.dirty = false;
        repo.put_day(&clean).await.unwrap();

        let dirty = repo.dirty_records().await.unwrap();
        assert_eq!(dirty.len(), 1);
        assert_eq!(dirty[0].progress.day(), day(1));

        assert_eq!(repo.all_days().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn clear_removes_all_records() {
        let repo = InMemoryRepository::new();
        repo.put_day(&dirty_record(1)).await.unwrap();
        repo.put_day(&dirty_record(2)).await.unwrap();
        ProgressRepository::clear(&repo).await.unwrap();
        assert!(repo.all_days().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn queue_enqueue_remove_and_prune() {
        let repo = InMemoryRepository::new();
        let now = fixed_now();

        let old = SyncQueueEntry::new(SyncAction::SectionUpdate, day(1), now - Duration::days(8));
        let fresh = SyncQueueEntry::new(SyncAction::QuizUpdate, day(2), now);
        let old_id = repo.enqueue(&old).await.unwrap();
        repo.enqueue(&fresh).await.unwrap();

        repo.mark_retry(old_id).await.unwrap();
        let pending = repo.pending().await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].retries, 1);

        let pruned = repo.prune_older_than(now - Duration::days(7)).await.unwrap();
        assert_eq!(pruned, 1);
        let pending = repo.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].action, SyncAction::QuizUpdate);

        let ids: Vec<i64> = pending.iter().filter_map(|e| e.id).collect();
        repo.remove(&ids).await.unwrap();
        assert!(repo.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn device_client_id_is_stable() {
        let storage = Storage::in_memory();
        let first = storage.device_client_id().await.unwrap();
        let second = storage.device_client_id().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn session_state_round_trip() {
        let repo = InMemoryRepository::new();
        assert!(repo.get_session_state().await.unwrap().is_none());

        let state = SessionState {
            current_day: Some(day(3)),
            last_route: Some("/day/3/slide/2".into()),
            updated_at: fixed_now(),
        };
        repo.put_session_state(&state).await.unwrap();
        assert_eq!(repo.get_session_state().await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn last_sync_marker_round_trip() {
        let repo = InMemoryRepository::new();
        assert!(repo.last_sync_at().await.unwrap().is_none());
        repo.set_last_sync_at(fixed_now()).await.unwrap();
        assert_eq!(repo.last_sync_at().await.unwrap(), Some(fixed_now()));
    }
}
