use chrono::Utc;
use sqlx::SqlitePool;

use super::SqliteInitError;

/// Runs a single, consolidated migration for the current schema.
///
/// Creates the full schema: per-day progress records with their sync
/// envelope, the sync queue, session state, and the sync metadata table.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), SqliteInitError> {
    async fn is_applied(pool: &SqlitePool, version: i64) -> Result<bool, sqlx::Error> {
        let row = sqlx::query("SELECT 1 FROM schema_migrations WHERE version = ?1")
            .bind(version)
            .fetch_optional(pool)
            .await?;
        Ok(row.is_some())
    }

    sqlx::query(
        r"
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            );
            ",
    )
    .execute(pool)
    .await?;

    // Version 1: full schema.
    if !is_applied(pool, 1).await? {
        let mut tx = pool.begin().await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS day_progress (
                    day INTEGER PRIMARY KEY CHECK (day BETWEEN 1 AND 5),
                    completed_sections TEXT NOT NULL,
                    completed_slides TEXT NOT NULL,
                    quiz_scores TEXT NOT NULL,
                    current_slide INTEGER NOT NULL CHECK (current_slide >= 0),
                    completion_percentage INTEGER NOT NULL
                        CHECK (completion_percentage BETWEEN 0 AND 100),
                    completed_at TEXT,
                    last_accessed TEXT NOT NULL,
                    dirty INTEGER NOT NULL CHECK (dirty IN (0, 1)),
                    sync_version INTEGER NOT NULL CHECK (sync_version >= 0),
                    client_id TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS sync_queue (
                    id INTEGER PRIMARY KEY,
                    action TEXT NOT NULL,
                    day INTEGER NOT NULL CHECK (day BETWEEN 1 AND 5),
                    enqueued_at TEXT NOT NULL,
                    retries INTEGER NOT NULL CHECK (retries >= 0)
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS session_state (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    current_day INTEGER,
                    last_route TEXT,
                    updated_at TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE TABLE IF NOT EXISTS sync_meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_day_progress_dirty
                    ON day_progress (dirty);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                CREATE INDEX IF NOT EXISTS idx_sync_queue_enqueued_at
                    ON sync_queue (enqueued_at);
            ",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
                INSERT INTO schema_migrations (version, applied_at)
                VALUES (?1, ?2)
                ON CONFLICT(version) DO NOTHING
            ",
        )
        .bind(1_i64)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
    }

    Ok(())
}
