// SQLite CheckpointStore Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;
use vdcmig_core::domain::CheckpointRecord;
use vdcmig_core::error::{AppError, Result};
use vdcmig_core::port::CheckpointStore;

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of saves applied to a unit's record (`None` if absent)
    pub async fn revision(&self, unit_id: &str) -> Result<Option<i64>> {
        sqlx::query_scalar("SELECT revision FROM checkpoints WHERE unit_id = ?")
            .bind(unit_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CheckpointRow {
    unit_id: String,
    record: String,
}

impl CheckpointRow {
    fn into_record(self) -> Result<CheckpointRecord> {
        serde_json::from_str(&self.record).map_err(|e| {
            AppError::Checkpoint(format!("corrupt record for unit {}: {}", self.unit_id, e))
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, unit_id: &str) -> Result<Option<CheckpointRecord>> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT unit_id, record FROM checkpoints WHERE unit_id = ?",
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        row.map(CheckpointRow::into_record).transpose()
    }

    async fn save(&self, record: &CheckpointRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;

        // Single statement: readers see the old row or the new one, never a mix
        sqlx::query(
            r#"
            INSERT INTO checkpoints (unit_id, unit_name, record, revision, updated_at)
            VALUES (?, ?, ?, 1, ?)
            ON CONFLICT(unit_id) DO UPDATE SET
                unit_name = excluded.unit_name,
                record = excluded.record,
                revision = checkpoints.revision + 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.unit_id)
        .bind(&record.unit_name)
        .bind(&json)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(unit_id = %record.unit_id, "Checkpoint saved");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<CheckpointRecord>> {
        let rows: Vec<CheckpointRow> =
            sqlx::query_as("SELECT unit_id, record FROM checkpoints ORDER BY unit_id")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        rows.into_iter().map(CheckpointRow::into_record).collect()
    }

    async fn delete(&self, unit_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE unit_id = ?")
            .bind(unit_id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}
