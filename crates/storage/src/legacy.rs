//! One-time migration of legacy flat-format progress data into the store.
//!
//! The legacy payload is the pre-transactional JSON blob kept by earlier
//! releases. Migration is idempotent (a persisted flag short-circuits
//! re-runs), backs the raw payload up before touching anything, and only
//! marks itself complete after every step has succeeded, so a failed run can
//! always be retried.

use chrono::{DateTime, Utc};
use course_core::Clock;
use course_core::model::{CourseOutline, DayId, DayProgress, QuizScore, SessionState, SyncableRecord};
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

use crate::repository::{Storage, StorageError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MigrationError {
    #[error("legacy payload is corrupted: {0}")]
    Corrupted(String),

    #[error("no legacy backup to restore")]
    NoBackup,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Counts reported by a completed migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub days_migrated: u32,
    pub sections_migrated: u32,
    pub quizzes_migrated: u32,
}

// Lenient mirror of the legacy JSON shape. Anything optional defaults;
// unknown fields are ignored. Only a payload that is not a JSON object at
// all is treated as corrupted.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacyData {
    current_day: Option<u8>,
    days: BTreeMap<String, LegacyDay>,
    session_state: Option<LegacySession>,
    // `overallProgress` is intentionally not read: the aggregate is always
    // recomputed from day records, never carried over.
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacyDay {
    completed_sections: Vec<String>,
    completed_slides: Vec<String>,
    quiz_scores: BTreeMap<String, i64>,
    current_slide: Option<u32>,
    last_accessed: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LegacySession {
    current_day: Option<u8>,
    last_route: Option<String>,
}

/// Upgrades legacy flat-format data into the transactional store.
pub struct MigrationAdapter {
    storage: Storage,
    clock: Clock,
}

impl MigrationAdapter {
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        Self {
            storage,
            clock: Clock::default_clock(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Whether migration has already completed on this device.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Storage` on storage failure.
    pub async fn has_migrated(&self) -> Result<bool, MigrationError> {
        Ok(self.storage.session.has_migrated().await?)
    }

    /// Runs the migration. A no-op returning an empty report if it already
    /// completed. The completion flag is only set after every step succeeds;
    /// on failure the legacy payload and backup are left intact so the next
    /// launch can retry.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::Corrupted` if the payload is not JSON, or
    /// `MigrationError::Storage` on storage failure.
    pub async fn migrate(
        &self,
        legacy_json: &str,
        outline: &CourseOutline,
    ) -> Result<MigrationReport, MigrationError> {
        if self.has_migrated().await? {
            return Ok(MigrationReport::default());
        }

        let legacy: LegacyData = serde_json::from_str(legacy_json)
            .map_err(|e| MigrationError::Corrupted(e.to_string()))?;

        // Back up the raw payload first so a partial failure is recoverable.
        self.storage.session.set_legacy_backup(legacy_json).await?;

        let client_id = self.storage.device_client_id().await?;
        let now = self.clock.now();

        let mut report = MigrationReport::default();
        for (key, legacy_day) in &legacy.days {
            let Ok(day) = key.parse::<DayId>() else {
                // Days outside the course range carry no usable progress.
                continue;
            };
            let progress = build_day_progress(day, legacy_day, outline, now);
            report.days_migrated += 1;
            report.sections_migrated +=
                u32::try_from(progress.completed_sections().len()).unwrap_or(u32::MAX);
            report.quizzes_migrated +=
                u32::try_from(progress.quiz_scores().len()).unwrap_or(u32::MAX);

            // Nothing has changed server-side, so records land clean.
            let record = SyncableRecord::clean(progress, 0, client_id.clone());
            self.storage.progress.put_day(&record).await?;
        }

        // Session state is secondary: malformed fields get defaults, and a
        // failure to build it never aborts the migration of progress data.
        let session = build_session_state(&legacy, now);
        self.storage.session.put_session_state(&session).await?;

        self.storage.session.set_migrated(true).await?;
        Ok(report)
    }

    /// Manual rollback: clears the migrated store and returns the backed-up
    /// legacy payload so the caller can restore the legacy path.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::NoBackup` if migration never ran, or
    /// `MigrationError::Storage` on storage failure.
    pub async fn restore_from_backup(&self) -> Result<String, MigrationError> {
        let Some(backup) = self.storage.session.legacy_backup().await? else {
            return Err(MigrationError::NoBackup);
        };
        self.storage.progress.clear().await?;
        self.storage.queue.clear().await?;
        self.storage.session.set_migrated(false).await?;
        Ok(backup)
    }
}

fn build_day_progress(
    day: DayId,
    legacy: &LegacyDay,
    outline: &CourseOutline,
    fallback_time: DateTime<Utc>,
) -> DayProgress {
    let touched_at = legacy.last_accessed.unwrap_or(fallback_time);
    let total_sections = outline.sections_for(day);

    let mut progress = DayProgress::new(day, touched_at);
    for section in &legacy.completed_sections {
        progress.set_section(section, true, total_sections, touched_at);
    }
    for slide in &legacy.completed_slides {
        progress.mark_slide(slide, touched_at);
    }
    for (quiz, raw) in &legacy.quiz_scores {
        // Lenient: clamp out-of-range legacy scores instead of dropping them.
        let clamped = u8::try_from((*raw).clamp(0, 100)).unwrap_or(100);
        if let Ok(score) = QuizScore::new(clamped) {
            progress.record_quiz_score(quiz, score, touched_at);
        }
    }
    if let Some(slide) = legacy.current_slide {
        progress.set_current_slide(slide, touched_at);
    }
    progress
}

fn build_session_state(legacy: &LegacyData, now: DateTime<Utc>) -> SessionState {
    let session = legacy.session_state.as_ref();
    let current_day = session
        .and_then(|s| s.current_day)
        .or(legacy.current_day)
        .and_then(|raw| DayId::new(raw).ok());
    SessionState {
        current_day,
        last_route: session.and_then(|s| s.last_route.clone()),
        updated_at: now,
    }
}
