use chrono::{DateTime, Utc};
use course_core::model::{ClientId, SessionState};
use sqlx::Row;

use super::{
    SqliteRepository,
    mapping::{day_id_from_i64, storage_err},
};
use crate::repository::{SessionStateRepository, StorageError};

const META_LAST_SYNC_AT: &str = "last_sync_at";
const META_MIGRATED: &str = "migrated";
const META_LEGACY_BACKUP: &str = "legacy_backup";
const META_CLIENT_ID: &str = "client_id";

impl SqliteRepository {
    async fn meta_get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let row = sqlx::query("SELECT value FROM sync_meta WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        row.map(|r| {
            r.try_get::<String, _>("value")
                .map_err(|e| StorageError::Serialization(e.to_string()))
        })
        .transpose()
    }

    async fn meta_set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO sync_meta (key, value) VALUES (?1, ?2)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStateRepository for SqliteRepository {
    async fn get_session_state(&self) -> Result<Option<SessionState>, StorageError> {
        let row = sqlx::query(
            "SELECT current_day, last_route, updated_at FROM session_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let current_day = row
            .try_get::<Option<i64>, _>("current_day")
            .map_err(|e| StorageError::Serialization(e.to_string()))?
            .map(day_id_from_i64)
            .transpose()?;

        Ok(Some(SessionState {
            current_day,
            last_route: row
                .try_get("last_route")
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| StorageError::Serialization(e.to_string()))?,
        }))
    }

    async fn put_session_state(&self, state: &SessionState) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO session_state (id, current_day, last_route, updated_at)
            VALUES (1, ?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                current_day = excluded.current_day,
                last_route = excluded.last_route,
                updated_at = excluded.updated_at
            ",
        )
        .bind(state.current_day.map(|d| i64::from(d.value())))
        .bind(state.last_route.as_deref())
        .bind(state.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn last_sync_at(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        self.meta_get(META_LAST_SYNC_AT)
            .await?
            .map(|raw| {
                raw.parse::<DateTime<Utc>>()
                    .map_err(|e| StorageError::Corrupted(e.to_string()))
            })
            .transpose()
    }

    async fn set_last_sync_at(&self, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.meta_set(META_LAST_SYNC_AT, &at.to_rfc3339()).await
    }

    async fn has_migrated(&self) -> Result<bool, StorageError> {
        Ok(self.meta_get(META_MIGRATED).await?.as_deref() == Some("true"))
    }

    async fn set_migrated(&self, migrated: bool) -> Result<(), StorageError> {
        self.meta_set(META_MIGRATED, if migrated { "true" } else { "false" })
            .await
    }

    async fn legacy_backup(&self) -> Result<Option<String>, StorageError> {
        self.meta_get(META_LEGACY_BACKUP).await
    }

    async fn set_legacy_backup(&self, blob: &str) -> Result<(), StorageError> {
        self.meta_set(META_LEGACY_BACKUP, blob).await
    }

    async fn client_id(&self) -> Result<Option<ClientId>, StorageError> {
        Ok(self.meta_get(META_CLIENT_ID).await?.map(ClientId::new))
    }

    async fn set_client_id(&self, id: &ClientId) -> Result<(), StorageError> {
        self.meta_set(META_CLIENT_ID, id.as_str()).await
    }
}
