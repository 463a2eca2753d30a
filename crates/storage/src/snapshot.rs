//! Full-state backup of the local store.
//!
//! Snapshots serialize every progress record plus the session state into one
//! versioned JSON document. Import validates the structural shape: records
//! missing required fields are rejected as corrupted rather than silently
//! defaulted, while genuinely optional fields fall back to safe values.

use chrono::{DateTime, Utc};
use course_core::model::{
    ClientId, DayId, DayProgress, QuizScore, SessionState, SyncableRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::repository::{Storage, StorageError};

const SNAPSHOT_VERSION: u32 = 1;

/// Serialized form of the whole local store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub days: Vec<SnapshotDay>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SnapshotSession>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotDay {
    pub day: u8,
    pub sync_version: i64,
    #[serde(default)]
    pub dirty: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub completed_sections: Vec<String>,
    #[serde(default)]
    pub completed_slides: Vec<String>,
    #[serde(default)]
    pub quiz_scores: BTreeMap<String, u8>,
    #[serde(default)]
    pub current_slide: u32,
    #[serde(default)]
    pub completion_percentage: u8,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSession {
    #[serde(default)]
    pub current_day: Option<u8>,
    #[serde(default)]
    pub last_route: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Serializes to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String, StorageError> {
        serde_json::to_string(self).map_err(|e| StorageError::Serialization(e.to_string()))
    }

    /// Parses a snapshot from JSON, rejecting documents with missing
    /// required fields or an unsupported version.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Corrupted` for malformed or unsupported input.
    pub fn from_json(raw: &str) -> Result<Self, StorageError> {
        let snapshot: Snapshot =
            serde_json::from_str(raw).map_err(|e| StorageError::Corrupted(e.to_string()))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(StorageError::Corrupted(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        Ok(snapshot)
    }
}

/// Serializes the full store state.
///
/// # Errors
///
/// Returns `StorageError` on storage failure.
pub async fn export_snapshot(storage: &Storage, now: DateTime<Utc>) -> Result<Snapshot, StorageError> {
    let records = storage.progress.all_days().await?;
    let session = storage.session.get_session_state().await?;

    let days = records
        .iter()
        .map(|record| SnapshotDay {
            day: record.progress.day().value(),
            sync_version: record.sync_version,
            dirty: record.dirty,
            client_id: Some(record.client_id.as_str().to_owned()),
            completed_sections: record.progress.completed_sections().to_vec(),
            completed_slides: record.progress.completed_slides().to_vec(),
            quiz_scores: record
                .progress
                .quiz_scores()
                .iter()
                .map(|(quiz, score)| (quiz.clone(), score.value()))
                .collect(),
            current_slide: record.progress.current_slide(),
            completion_percentage: record.progress.completion_percentage(),
            completed_at: record.progress.completed_at(),
            last_accessed: Some(record.progress.last_accessed()),
        })
        .collect();

    Ok(Snapshot {
        version: SNAPSHOT_VERSION,
        exported_at: now,
        days,
        session: session.map(|state| SnapshotSession {
            current_day: state.current_day.map(|d| d.value()),
            last_route: state.last_route,
            updated_at: Some(state.updated_at),
        }),
    })
}

/// Replaces the store contents with the snapshot's.
///
/// The snapshot is validated in full before any write, so a corrupted
/// document leaves the prior state untouched.
///
/// # Errors
///
/// Returns `StorageError::Corrupted` if any record fails validation, or
/// another `StorageError` on storage failure.
pub async fn import_snapshot(storage: &Storage, snapshot: &Snapshot) -> Result<(), StorageError> {
    let mut records = Vec::with_capacity(snapshot.days.len());
    for day in &snapshot.days {
        records.push(record_from_snapshot(day, snapshot.exported_at)?);
    }

    storage.progress.clear().await?;
    for record in &records {
        storage.progress.put_day(record).await?;
    }

    if let Some(session) = &snapshot.session {
        let current_day = session
            .current_day
            .map(DayId::new)
            .transpose()
            .map_err(|e| StorageError::Corrupted(e.to_string()))?;
        storage
            .session
            .put_session_state(&SessionState {
                current_day,
                last_route: session.last_route.clone(),
                updated_at: session.updated_at.unwrap_or(snapshot.exported_at),
            })
            .await?;
    }

    Ok(())
}

fn record_from_snapshot(
    day: &SnapshotDay,
    fallback_time: DateTime<Utc>,
) -> Result<SyncableRecord, StorageError> {
    let day_id = DayId::new(day.day).map_err(|e| StorageError::Corrupted(e.to_string()))?;
    if day.sync_version < 0 {
        return Err(StorageError::Corrupted(format!(
            "negative sync version for day {day_id}"
        )));
    }

    let mut quiz_scores = BTreeMap::new();
    for (quiz, raw) in &day.quiz_scores {
        let score = QuizScore::new(*raw).map_err(|e| StorageError::Corrupted(e.to_string()))?;
        quiz_scores.insert(quiz.clone(), score);
    }

    let progress = DayProgress::from_persisted(
        day_id,
        day.completed_sections.clone(),
        day.completed_slides.clone(),
        quiz_scores,
        day.current_slide,
        day.completion_percentage,
        day.completed_at,
        day.last_accessed.unwrap_or(fallback_time),
    )
    .map_err(|e| StorageError::Corrupted(e.to_string()))?;

    Ok(SyncableRecord {
        progress,
        dirty: day.dirty,
        sync_version: day.sync_version,
        client_id: day
            .client_id
            .clone()
            .map_or_else(ClientId::generate, ClientId::new),
    })
}
