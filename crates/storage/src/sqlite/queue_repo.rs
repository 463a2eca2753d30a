use chrono::{DateTime, Utc};
use course_core::model::SyncQueueEntry;

use super::{
    SqliteRepository,
    mapping::{day_id_to_i64, map_queue_row, storage_err},
};
use crate::repository::{StorageError, SyncQueueRepository};

#[async_trait::async_trait]
impl SyncQueueRepository for SqliteRepository {
    async fn enqueue(&self, entry: &SyncQueueEntry) -> Result<i64, StorageError> {
        let result = sqlx::query(
            r"
            INSERT INTO sync_queue (action, day, enqueued_at, retries)
            VALUES (?1, ?2, ?3, ?4)
            ",
        )
        .bind(entry.action.as_str())
        .bind(day_id_to_i64(entry.day))
        .bind(entry.enqueued_at)
        .bind(i64::from(entry.retries))
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.last_insert_rowid())
    }

    async fn pending(&self) -> Result<Vec<SyncQueueEntry>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, action, day, enqueued_at, retries
            FROM sync_queue
            ORDER BY id ASC
            ",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;
        rows.iter().map(map_queue_row).collect()
    }

    async fn mark_retry(&self, id: i64) -> Result<(), StorageError> {
        sqlx::query("UPDATE sync_queue SET retries = retries + 1 WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn remove(&self, ids: &[i64]) -> Result<(), StorageError> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut sql = String::from("DELETE FROM sync_queue WHERE id IN (");
        for i in 0..ids.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            sql.push_str(&(i + 1).to_string());
        }
        sql.push(')');

        let mut q = sqlx::query(&sql);
        for id in ids {
            q = q.bind(id);
        }
        q.execute(&self.pool).await.map_err(storage_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM sync_queue")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM sync_queue WHERE enqueued_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(result.rows_affected())
    }
}
