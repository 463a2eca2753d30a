use std::collections::BTreeMap;

use course_core::model::{
    ClientId, DayId, DayProgress, QuizScore, SyncAction, SyncQueueEntry, SyncableRecord,
};
use sqlx::Row;

use crate::repository::StorageError;

fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

pub(crate) fn day_id_from_i64(v: i64) -> Result<DayId, StorageError> {
    let raw = u8::try_from(v).map_err(|_| StorageError::Corrupted(format!("invalid day: {v}")))?;
    DayId::new(raw).map_err(|e| StorageError::Corrupted(e.to_string()))
}

pub(crate) fn day_id_to_i64(day: DayId) -> i64 {
    i64::from(day.value())
}

/// Set/map fields are stored as JSON text columns.
pub(crate) fn string_list_to_json(items: &[String]) -> Result<String, StorageError> {
    serde_json::to_string(items).map_err(ser)
}

pub(crate) fn string_list_from_json(raw: &str) -> Result<Vec<String>, StorageError> {
    serde_json::from_str(raw).map_err(|e| StorageError::Corrupted(e.to_string()))
}

pub(crate) fn quiz_scores_to_json(
    scores: &BTreeMap<String, QuizScore>,
) -> Result<String, StorageError> {
    let raw: BTreeMap<&str, u8> = scores
        .iter()
        .map(|(quiz, score)| (quiz.as_str(), score.value()))
        .collect();
    serde_json::to_string(&raw).map_err(ser)
}

pub(crate) fn quiz_scores_from_json(
    raw: &str,
) -> Result<BTreeMap<String, QuizScore>, StorageError> {
    let parsed: BTreeMap<String, u8> =
        serde_json::from_str(raw).map_err(|e| StorageError::Corrupted(e.to_string()))?;
    let mut scores = BTreeMap::new();
    for (quiz, value) in parsed {
        let score = QuizScore::new(value).map_err(|e| StorageError::Corrupted(e.to_string()))?;
        scores.insert(quiz, score);
    }
    Ok(scores)
}

pub(crate) fn map_progress_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<SyncableRecord, StorageError> {
    let day = day_id_from_i64(row.try_get::<i64, _>("day").map_err(ser)?)?;

    let sections = string_list_from_json(&row.try_get::<String, _>("completed_sections").map_err(ser)?)?;
    let slides = string_list_from_json(&row.try_get::<String, _>("completed_slides").map_err(ser)?)?;
    let scores = quiz_scores_from_json(&row.try_get::<String, _>("quiz_scores").map_err(ser)?)?;

    let current_slide_i64: i64 = row.try_get("current_slide").map_err(ser)?;
    let current_slide = u32::try_from(current_slide_i64)
        .map_err(|_| StorageError::Corrupted(format!("invalid current_slide: {current_slide_i64}")))?;

    let pct_i64: i64 = row.try_get("completion_percentage").map_err(ser)?;
    let completion_percentage = u8::try_from(pct_i64)
        .map_err(|_| StorageError::Corrupted(format!("invalid completion_percentage: {pct_i64}")))?;

    let progress = DayProgress::from_persisted(
        day,
        sections,
        slides,
        scores,
        current_slide,
        completion_percentage,
        row.try_get("completed_at").map_err(ser)?,
        row.try_get("last_accessed").map_err(ser)?,
    )
    .map_err(|e| StorageError::Corrupted(e.to_string()))?;

    let dirty_i64: i64 = row.try_get("dirty").map_err(ser)?;
    let sync_version: i64 = row.try_get("sync_version").map_err(ser)?;
    if sync_version < 0 {
        return Err(StorageError::Corrupted(format!(
            "invalid sync_version: {sync_version}"
        )));
    }

    Ok(SyncableRecord {
        progress,
        dirty: dirty_i64 != 0,
        sync_version,
        client_id: ClientId::new(row.try_get::<String, _>("client_id").map_err(ser)?),
    })
}

pub(crate) fn map_queue_row(row: &sqlx::sqlite::SqliteRow) -> Result<SyncQueueEntry, StorageError> {
    let action_raw: String = row.try_get("action").map_err(ser)?;
    let action = action_raw
        .parse::<SyncAction>()
        .map_err(|e| StorageError::Corrupted(e.to_string()))?;

    let retries_i64: i64 = row.try_get("retries").map_err(ser)?;
    let retries = u32::try_from(retries_i64)
        .map_err(|_| StorageError::Corrupted(format!("invalid retries: {retries_i64}")))?;

    Ok(SyncQueueEntry {
        id: Some(row.try_get("id").map_err(ser)?),
        action,
        day: day_id_from_i64(row.try_get::<i64, _>("day").map_err(ser)?)?,
        enqueued_at: row.try_get("enqueued_at").map_err(ser)?,
        retries,
    })
}

/// Maps an sqlx error, classifying disk-full conditions as quota errors.
pub(crate) fn storage_err(e: sqlx::Error) -> StorageError {
    let message = e.to_string();
    if message.contains("disk is full") || message.contains("database or disk is full") {
        StorageError::QuotaExceeded(message)
    } else {
        StorageError::Connection(message)
    }
}
