use course_core::model::{DayId, SyncableRecord};

use super::{
    SqliteRepository,
    mapping::{
        day_id_to_i64, map_progress_row, quiz_scores_to_json, storage_err, string_list_to_json,
    },
};
use crate::repository::{ProgressRepository, StorageError};

const SELECT_COLUMNS: &str = r"
    SELECT
        day, completed_sections, completed_slides, quiz_scores, current_slide,
        completion_percentage, completed_at, last_accessed, dirty, sync_version, client_id
    FROM day_progress
";

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_day(&self, day: DayId) -> Result<Option<SyncableRecord>, StorageError> {
        let sql = format!("{SELECT_COLUMNS} WHERE day = ?1");
        let row = sqlx::query(&sql)
            .bind(day_id_to_i64(day))
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.as_ref().map(map_progress_row).transpose()
    }

    async fn put_day(&self, record: &SyncableRecord) -> Result<(), StorageError> {
        let progress = &record.progress;
        sqlx::query(
            r"
            INSERT INTO day_progress (
                day, completed_sections, completed_slides, quiz_scores, current_slide,
                completion_percentage, completed_at, last_accessed, dirty, sync_version, client_id
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            ON CONFLICT(day) DO UPDATE SET
                completed_sections = excluded.completed_sections,
                completed_slides = excluded.completed_slides,
                quiz_scores = excluded.quiz_scores,
                current_slide = excluded.current_slide,
                completion_percentage = excluded.completion_percentage,
                completed_at = excluded.completed_at,
                last_accessed = excluded.last_accessed,
                dirty = excluded.dirty,
                sync_version = excluded.sync_version,
                client_id = excluded.client_id
            ",
        )
        .bind(day_id_to_i64(progress.day()))
        .bind(string_list_to_json(progress.completed_sections())?)
        .bind(string_list_to_json(progress.completed_slides())?)
        .bind(quiz_scores_to_json(progress.quiz_scores())?)
        .bind(i64::from(progress.current_slide()))
        .bind(i64::from(progress.completion_percentage()))
        .bind(progress.completed_at())
        .bind(progress.last_accessed())
        .bind(i64::from(record.dirty))
        .bind(record.sync_version)
        .bind(record.client_id.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    async fn all_days(&self) -> Result<Vec<SyncableRecord>, StorageError> {
        let sql = format!("{SELECT_COLUMNS} ORDER BY day ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(map_progress_row).collect()
    }

    async fn dirty_records(&self) -> Result<Vec<SyncableRecord>, StorageError> {
        let sql = format!("{SELECT_COLUMNS} WHERE dirty = 1 ORDER BY day ASC");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows.iter().map(map_progress_row).collect()
    }

    async fn clear(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM day_progress")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}
