//! High-level progress operations for the UI.
//!
//! Every mutation lands in local storage first and returns once the write is
//! durable. Sync is opportunistic: mutations mark records dirty and enqueue a
//! pending action, and quiz submissions additionally kick off an immediate
//! background push. A sync failure never fails the local operation.

use std::collections::BTreeMap;
use std::sync::Arc;

use course_core::Clock;
use course_core::model::{
    CourseOutline, DayId, DayProgress, QuizScore, SessionState, SyncAction, SyncQueueEntry,
    SyncableRecord, UserProgress,
};
use storage::Storage;

use crate::error::ProgressServiceError;
use crate::sync::{SyncEngine, SyncOptions, SyncReport};

pub struct ProgressService {
    storage: Storage,
    outline: CourseOutline,
    clock: Clock,
    engine: Option<Arc<SyncEngine>>,
}

impl ProgressService {
    #[must_use]
    pub fn new(storage: Storage, outline: CourseOutline) -> Self {
        Self {
            storage,
            outline,
            clock: Clock::default(),
            engine: None,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_sync_engine(mut self, engine: Arc<SyncEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Marks or unmarks a section as completed, re-deriving the day's
    /// completion percentage.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if the record cannot be stored.
    pub async fn update_section_completion(
        &self,
        day: DayId,
        section_id: &str,
        completed: bool,
    ) -> Result<DayProgress, ProgressServiceError> {
        let now = self.clock.now();
        let total = self.outline.sections_for(day);
        let progress = self
            .mutate_day(day, SyncAction::SectionUpdate, |p| {
                p.set_section(section_id, completed, total, now);
            })
            .await?;
        Ok(progress)
    }

    /// Records a quiz score and kicks off an immediate background push.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError::Progress` for scores above 100, or a
    /// storage error if the record cannot be stored. Sync failures are
    /// logged, never propagated.
    pub async fn update_quiz_score(
        &self,
        day: DayId,
        quiz_id: &str,
        score: u8,
    ) -> Result<DayProgress, ProgressServiceError> {
        let score = QuizScore::new(score)?;
        let now = self.clock.now();
        let progress = self
            .mutate_day(day, SyncAction::QuizUpdate, |p| {
                p.record_quiz_score(quiz_id, score, now);
            })
            .await?;

        // Quiz results are the data users most hate losing, so push them
        // right away instead of waiting for the periodic pass. The push
        // runs on its own task: the caller never waits on the network or
        // the retry backoff.
        if let Some(engine) = &self.engine {
            let engine = Arc::clone(engine);
            tokio::spawn(async move {
                if let Err(err) = engine.sync(SyncOptions::default()).await {
                    if err.is_guard() {
                        tracing::debug!(error = %err, "background quiz sync skipped");
                    } else {
                        tracing::warn!(error = %err, "background quiz sync failed");
                    }
                }
            });
        }
        Ok(progress)
    }

    /// Bookmarks the slide the user is currently viewing.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if the record cannot be stored.
    pub async fn update_current_slide(
        &self,
        day: DayId,
        slide_index: u32,
    ) -> Result<DayProgress, ProgressServiceError> {
        let now = self.clock.now();
        self.mutate_day(day, SyncAction::SlideUpdate, |p| {
            p.set_current_slide(slide_index, now);
        })
        .await
    }

    /// Marks an individual slide as viewed.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` if the record cannot be stored.
    pub async fn mark_slide_completed(
        &self,
        day: DayId,
        slide_id: &str,
    ) -> Result<DayProgress, ProgressServiceError> {
        let now = self.clock.now();
        self.mutate_day(day, SyncAction::SlideUpdate, |p| {
            p.mark_slide(slide_id, now);
        })
        .await
    }

    /// One day's progress, or an empty record if the day was never touched.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` on storage failure.
    pub async fn get_day_progress(&self, day: DayId) -> Result<DayProgress, ProgressServiceError> {
        match self.storage.progress.get_day(day).await? {
            Some(record) => Ok(record.progress),
            None => Ok(DayProgress::new(day, self.clock.now())),
        }
    }

    /// Aggregate over all stored days plus the session's current day.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` on storage failure.
    pub async fn get_user_progress(&self) -> Result<UserProgress, ProgressServiceError> {
        let records = self.storage.progress.all_days().await?;
        let days: BTreeMap<DayId, DayProgress> = records
            .into_iter()
            .map(|r| (r.progress.day(), r.progress))
            .collect();
        let current_day = self
            .storage
            .session
            .get_session_state()
            .await?
            .and_then(|s| s.current_day);
        Ok(UserProgress::from_days(current_day, days, self.clock.now()))
    }

    /// Remembers which day the user is working on across restarts.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` on storage failure.
    pub async fn set_current_day(&self, day: DayId) -> Result<(), ProgressServiceError> {
        let now = self.clock.now();
        let mut state = self
            .storage
            .session
            .get_session_state()
            .await?
            .unwrap_or_else(|| SessionState::empty(now));
        state.current_day = Some(day);
        state.updated_at = now;
        self.storage.session.put_session_state(&state).await?;
        Ok(())
    }

    /// Runs an explicit sync, surfacing the outcome to the caller.
    ///
    /// # Errors
    ///
    /// Returns `SyncUnavailable` when no engine is configured, otherwise any
    /// `SyncError` from the pass.
    pub async fn sync_progress(
        &self,
        options: SyncOptions,
    ) -> Result<SyncReport, ProgressServiceError> {
        let engine = self
            .engine
            .as_ref()
            .ok_or(ProgressServiceError::SyncUnavailable)?;
        Ok(engine.sync(options).await?)
    }

    /// Wipes all local progress, pending queue entries, and session state.
    ///
    /// # Errors
    ///
    /// Returns `ProgressServiceError` on storage failure.
    pub async fn clear_all_progress(&self) -> Result<(), ProgressServiceError> {
        self.storage.progress.clear().await?;
        self.storage.queue.clear().await?;
        let empty = SessionState::empty(self.clock.now());
        self.storage.session.put_session_state(&empty).await?;
        Ok(())
    }

    /// Load-mutate-store for one day: the record comes back dirty and, when a
    /// signed-in engine is attached, the mutation is queued for the next pass.
    async fn mutate_day(
        &self,
        day: DayId,
        action: SyncAction,
        mutate: impl FnOnce(&mut DayProgress),
    ) -> Result<DayProgress, ProgressServiceError> {
        let now = self.clock.now();
        let client_id = self.storage.device_client_id().await?;
        let mut record = match self.storage.progress.get_day(day).await? {
            Some(record) => record,
            None => SyncableRecord::new_dirty(DayProgress::new(day, now), client_id),
        };
        mutate(&mut record.progress);
        record.dirty = true;
        self.storage.progress.put_day(&record).await?;

        if self.engine.as_ref().is_some_and(|e| e.is_authenticated()) {
            let entry = SyncQueueEntry::new(action, day, now);
            self.storage.queue.enqueue(&entry).await?;
        }
        Ok(record.progress)
    }
}
