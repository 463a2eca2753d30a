use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{
    ClientId, ConflictStrategy, CourseOutline, DayId, DayProgress, SyncAction, SyncQueueEntry,
    SyncableRecord,
};
use course_core::time::{fixed_clock, fixed_now};
use services::remote::{PushResponse, RemoteError, RemoteProgress, RemoteRecord};
use services::{ProgressService, SyncConfig, SyncEngine, SyncError, SyncOptions};
use storage::Storage;

fn day(n: u8) -> DayId {
    DayId::new(n).unwrap()
}

fn dirty_record(n: u8, sections: &[&str]) -> SyncableRecord {
    let now = fixed_now();
    let mut progress = DayProgress::new(day(n), now);
    for section in sections {
        progress.set_section(section, true, 3, now);
    }
    SyncableRecord::new_dirty(progress, ClientId::new("device-a"))
}

fn remote_record(n: u8, sections: &[&str], version: i64, updated_at: DateTime<Utc>) -> RemoteRecord {
    RemoteRecord {
        day_id: n,
        completed_sections: sections.iter().map(|s| (*s).to_owned()).collect(),
        completed_slides: Vec::new(),
        quiz_scores: BTreeMap::new(),
        current_slide: 0,
        is_completed: false,
        completed_at: None,
        updated_at,
        sync_version: version,
        client_id: Some("device-b".to_owned()),
    }
}

#[derive(Default)]
struct FakeState {
    records: BTreeMap<u8, RemoteRecord>,
    push_calls: u32,
    fetch_calls: u32,
    last_since: Option<Option<DateTime<Utc>>>,
    fail_pushes: u32,
    unauthorized: bool,
    accept_pushes: bool,
    next_version: i64,
}

/// Scripted in-memory stand-in for the hosted progress service.
#[derive(Default)]
struct FakeRemote {
    state: Mutex<FakeState>,
    push_delay: Option<Duration>,
}

impl FakeRemote {
    fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                accept_pushes: true,
                ..FakeState::default()
            }),
            push_delay: None,
        }
    }

    fn seed(&self, record: RemoteRecord) {
        let mut state = self.state.lock().unwrap();
        state.next_version = state.next_version.max(record.sync_version);
        state.records.insert(record.day_id, record);
    }

    fn push_calls(&self) -> u32 {
        self.state.lock().unwrap().push_calls
    }

    fn last_since(&self) -> Option<Option<DateTime<Utc>>> {
        self.state.lock().unwrap().last_since
    }
}

#[async_trait]
impl RemoteProgress for FakeRemote {
    async fn fetch_updated_since(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<RemoteRecord>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.fetch_calls += 1;
        state.last_since = Some(since);
        Ok(state
            .records
            .values()
            .filter(|r| since.is_none_or(|cutoff| r.updated_at > cutoff))
            .cloned()
            .collect())
    }

    async fn push_batch(
        &self,
        records: &[RemoteRecord],
        _strategy: ConflictStrategy,
    ) -> Result<PushResponse, RemoteError> {
        if let Some(delay) = self.push_delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.push_calls += 1;
        if state.unauthorized {
            return Err(RemoteError::Unauthorized);
        }
        if state.fail_pushes > 0 {
            state.fail_pushes -= 1;
            return Err(RemoteError::Timeout);
        }
        if !state.accept_pushes {
            return Ok(PushResponse::default());
        }

        let mut echoed = Vec::new();
        for record in records {
            state.next_version += 1;
            let mut stored = record.clone();
            stored.sync_version = state.next_version;
            state.records.insert(stored.day_id, stored.clone());
            echoed.push(stored);
        }
        Ok(PushResponse {
            records: echoed,
            conflicts: Vec::new(),
        })
    }
}

fn test_config() -> SyncConfig {
    SyncConfig {
        base_delay: Duration::from_millis(10),
        ..SyncConfig::default()
    }
}

fn engine(storage: &Storage, remote: Arc<FakeRemote>) -> SyncEngine {
    let engine = SyncEngine::new(
        storage.clone(),
        remote,
        CourseOutline::uniform(3),
        test_config(),
    )
    .with_clock(fixed_clock());
    engine.set_authenticated(true);
    engine
}

#[tokio::test]
async fn successful_sync_clears_dirty_flags_and_bumps_version() {
    let storage = Storage::in_memory();
    storage.progress.put_day(&dirty_record(1, &["s1"])).await.unwrap();
    let remote = Arc::new(FakeRemote::new());
    let engine = engine(&storage, remote.clone());

    let report = engine.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.pushed, 1);
    assert_eq!(remote.push_calls(), 1);

    let stored = storage.progress.get_day(day(1)).await.unwrap().unwrap();
    assert!(!stored.dirty);
    assert!(stored.sync_version > 0);
    assert!(storage.session.last_sync_at().await.unwrap().is_some());
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let storage = Storage::in_memory();
    storage.progress.put_day(&dirty_record(1, &["s1"])).await.unwrap();
    let entry = SyncQueueEntry::new(SyncAction::SectionUpdate, day(1), fixed_now());
    storage.queue.enqueue(&entry).await.unwrap();

    let remote = Arc::new(FakeRemote::new());
    remote.state.lock().unwrap().fail_pushes = 2;
    let engine = engine(&storage, remote.clone());

    engine.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(remote.push_calls(), 3);
    // The entry was consumed by the successful pass after two retry bumps.
    assert!(storage.queue.pending().await.unwrap().is_empty());
    assert!(!storage.progress.get_day(day(1)).await.unwrap().unwrap().dirty);
}

#[tokio::test]
async fn exhausted_retries_keep_records_dirty() {
    let storage = Storage::in_memory();
    storage.progress.put_day(&dirty_record(1, &["s1"])).await.unwrap();
    let remote = Arc::new(FakeRemote::new());
    remote.state.lock().unwrap().fail_pushes = 10;
    let engine = engine(&storage, remote.clone());

    let err = engine.sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout));
    assert_eq!(remote.push_calls(), 3);
    assert!(storage.progress.get_day(day(1)).await.unwrap().unwrap().dirty);
}

#[tokio::test]
async fn offline_engine_fails_fast_without_touching_remote() {
    let storage = Storage::in_memory();
    storage.progress.put_day(&dirty_record(1, &["s1"])).await.unwrap();
    let remote = Arc::new(FakeRemote::new());
    let engine = engine(&storage, remote.clone());
    engine.set_online(false);

    let err = engine.sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::Offline));
    assert_eq!(remote.push_calls(), 0);
    assert!(storage.progress.get_day(day(1)).await.unwrap().unwrap().dirty);
}

#[tokio::test]
async fn signed_out_engine_refuses_to_sync() {
    let storage = Storage::in_memory();
    let remote = Arc::new(FakeRemote::new());
    let engine = engine(&storage, remote);
    engine.set_authenticated(false);

    let err = engine.sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::NotAuthenticated));
}

#[tokio::test]
async fn concurrent_sync_calls_run_at_most_one_pass() {
    let storage = Storage::in_memory();
    storage.progress.put_day(&dirty_record(1, &["s1"])).await.unwrap();
    let remote = Arc::new(FakeRemote {
        state: Mutex::new(FakeState {
            accept_pushes: true,
            ..FakeState::default()
        }),
        push_delay: Some(Duration::from_millis(100)),
    });
    let engine = Arc::new(engine(&storage, remote.clone()));

    let (first, second) = tokio::join!(
        engine.sync(SyncOptions::default()),
        engine.sync(SyncOptions::default())
    );
    let rejected = [&first, &second]
        .iter()
        .filter(|r| matches!(r, Err(SyncError::AlreadySyncing)))
        .count();
    assert_eq!(rejected, 1);
    assert!(first.is_ok() || second.is_ok());
    assert_eq!(remote.push_calls(), 1);
}

#[tokio::test]
async fn local_edit_during_push_survives_and_stays_dirty() {
    let storage = Storage::in_memory();
    storage.progress.put_day(&dirty_record(1, &["s1"])).await.unwrap();
    let remote = Arc::new(FakeRemote {
        state: Mutex::new(FakeState {
            accept_pushes: true,
            ..FakeState::default()
        }),
        push_delay: Some(Duration::from_millis(100)),
    });
    let engine = engine(&storage, remote.clone());

    // A second section lands while the push is still in flight.
    let edit_mid_push = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        storage
            .progress
            .put_day(&dirty_record(1, &["s1", "s2"]))
            .await
            .unwrap();
    };
    let (result, ()) = tokio::join!(engine.sync(SyncOptions::default()), edit_mid_push);
    result.unwrap();

    let stored = storage.progress.get_day(day(1)).await.unwrap().unwrap();
    assert!(stored.progress.has_section("s1"));
    assert!(stored.progress.has_section("s2"), "mid-push edit was lost");
    assert!(stored.dirty, "surviving edit must stay pushable");

    // The next pass pushes the surviving edit and settles clean.
    engine.sync(SyncOptions::default()).await.unwrap();
    let stored = storage.progress.get_day(day(1)).await.unwrap().unwrap();
    assert!(stored.progress.has_section("s2"));
    assert!(!stored.dirty);
    assert_eq!(remote.push_calls(), 2);
}

#[tokio::test]
async fn quiz_update_pushes_in_background_without_blocking() {
    let storage = Storage::in_memory();
    let remote = Arc::new(FakeRemote {
        state: Mutex::new(FakeState {
            accept_pushes: true,
            ..FakeState::default()
        }),
        push_delay: Some(Duration::from_millis(200)),
    });
    let engine = Arc::new(engine(&storage, remote.clone()));
    let service = ProgressService::new(storage.clone(), CourseOutline::uniform(3))
        .with_clock(fixed_clock())
        .with_sync_engine(Arc::clone(&engine));

    // The call returns once the score is persisted locally, well before
    // the slow remote finishes.
    let updated = tokio::time::timeout(
        Duration::from_millis(100),
        service.update_quiz_score(day(1), "q1", 90),
    )
    .await
    .expect("quiz update must not wait for the push")
    .unwrap();
    assert_eq!(updated.quiz_scores()["q1"].value(), 90);

    // The spawned push lands shortly after.
    for _ in 0..50 {
        if remote.push_calls() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(remote.push_calls(), 1);
}

#[tokio::test]
async fn unauthorized_response_is_not_retried() {
    let storage = Storage::in_memory();
    storage.progress.put_day(&dirty_record(1, &["s1"])).await.unwrap();
    let remote = Arc::new(FakeRemote::new());
    remote.state.lock().unwrap().unauthorized = true;
    let engine = engine(&storage, remote.clone());

    let err = engine.sync(SyncOptions::default()).await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized));
    assert_eq!(remote.push_calls(), 1);
}

#[tokio::test]
async fn pull_merges_remote_changes_into_dirty_local_record() {
    let storage = Storage::in_memory();
    storage.progress.put_day(&dirty_record(1, &["local-1"])).await.unwrap();

    let remote = Arc::new(FakeRemote::new());
    // The remote stays silent on the push, so the local record keeps its
    // dirty flag and the pulled copy has to be merged, not adopted.
    remote.state.lock().unwrap().accept_pushes = false;
    remote.seed(remote_record(1, &["remote-1"], 5, fixed_now()));
    let engine = engine(&storage, remote);

    engine.sync(SyncOptions::default()).await.unwrap();

    let stored = storage.progress.get_day(day(1)).await.unwrap().unwrap();
    assert!(stored.progress.has_section("local-1"));
    assert!(stored.progress.has_section("remote-1"));
    assert_eq!(stored.sync_version, 5);
    // Local-only sections still need pushing.
    assert!(stored.dirty);
}

#[tokio::test]
async fn pull_inserts_days_unknown_locally() {
    let storage = Storage::in_memory();
    let remote = Arc::new(FakeRemote::new());
    remote.seed(remote_record(3, &["r1", "r2"], 4, fixed_now()));
    let engine = engine(&storage, remote);

    let report = engine.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(report.pushed, 0);
    assert_eq!(report.pulled, 1);

    let stored = storage.progress.get_day(day(3)).await.unwrap().unwrap();
    assert!(!stored.dirty);
    assert_eq!(stored.sync_version, 4);
    assert_eq!(stored.progress.completion_percentage(), 67);
}

#[tokio::test]
async fn incremental_pull_uses_the_last_sync_marker() {
    let storage = Storage::in_memory();
    let remote = Arc::new(FakeRemote::new());
    let engine = engine(&storage, remote.clone());

    engine.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(remote.last_since(), Some(None));

    engine.sync(SyncOptions::default()).await.unwrap();
    assert_eq!(remote.last_since(), Some(Some(fixed_now())));

    // A forced full pass ignores the marker.
    engine.sync(SyncOptions { force_full: true }).await.unwrap();
    assert_eq!(remote.last_since(), Some(None));
}

#[tokio::test]
async fn stale_queue_entries_are_reaped_after_a_pass() {
    let storage = Storage::in_memory();
    let old = SyncQueueEntry::new(
        SyncAction::SlideUpdate,
        day(2),
        fixed_now() - chrono::Duration::days(10),
    );
    storage.queue.enqueue(&old).await.unwrap();
    let remote = Arc::new(FakeRemote::new());
    let engine = engine(&storage, remote);

    engine.sync(SyncOptions::default()).await.unwrap();
    assert!(storage.queue.pending().await.unwrap().is_empty());
}
