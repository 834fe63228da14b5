use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bandwatch_model::{MeasurementId, MeasurementRecord, MeasurementStatus, TriggerReason};
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    database::ports::{CompletedMeasurement, MeasurementRepository},
    error::{StorageError, StorageResult},
};

const COLUMNS: &str = r#"
    id,
    trigger_reason,
    trigger_result_id,
    status,
    download_mbps,
    upload_mbps,
    latency_ms,
    screenshot_path,
    export_path,
    archive_path,
    error,
    created_at,
    updated_at
"#;

const SINGLE_ACTIVE_INDEX: &str = "measurements_single_active_idx";

#[derive(Debug, Clone)]
pub struct PostgresMeasurementRepository {
    pool: PgPool,
}

impl PostgresMeasurementRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn map_row(row: &PgRow) -> StorageResult<MeasurementRecord> {
        let id: Uuid = row.try_get("id")?;
        let trigger_reason: String = row.try_get("trigger_reason")?;
        let status: String = row.try_get("status")?;

        Ok(MeasurementRecord {
            id: MeasurementId(id),
            trigger_reason: trigger_reason.parse::<TriggerReason>()?,
            trigger_result_id: row.try_get("trigger_result_id")?,
            status: status.parse::<MeasurementStatus>()?,
            download_mbps: row.try_get("download_mbps")?,
            upload_mbps: row.try_get("upload_mbps")?,
            latency_ms: row.try_get("latency_ms")?,
            screenshot_path: path_column(row, "screenshot_path")?,
            export_path: path_column(row, "export_path")?,
            archive_path: path_column(row, "archive_path")?,
            error: row.try_get("error")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn path_column(row: &PgRow, column: &str) -> StorageResult<Option<PathBuf>> {
    let value: Option<String> = row.try_get(column)?;
    Ok(value.map(PathBuf::from))
}

fn path_text(path: Option<&Path>) -> Option<String> {
    path.map(|path| path.to_string_lossy().into_owned())
}

fn is_single_active_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            db.is_unique_violation() && db.constraint() == Some(SINGLE_ACTIVE_INDEX)
        }
        _ => false,
    }
}

#[async_trait]
impl MeasurementRepository for PostgresMeasurementRepository {
    async fn create(&self, record: &MeasurementRecord) -> StorageResult<MeasurementRecord> {
        let sql = format!(
            r#"
            INSERT INTO measurements (
                id, trigger_reason, trigger_result_id, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(record.id.to_uuid())
            .bind(record.trigger_reason.as_str())
            .bind(record.trigger_result_id)
            .bind(record.status.as_str())
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_one(self.pool())
            .await
            .map_err(|err| {
                if is_single_active_violation(&err) {
                    StorageError::ActiveConflict
                } else {
                    StorageError::Database(err)
                }
            })?;

        Self::map_row(&row)
    }

    async fn get(&self, id: MeasurementId) -> StorageResult<Option<MeasurementRecord>> {
        let sql = format!("SELECT {COLUMNS} FROM measurements WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.to_uuid())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn list_recent(&self, limit: u32) -> StorageResult<Vec<MeasurementRecord>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM measurements ORDER BY created_at DESC, id DESC LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn find_active(&self) -> StorageResult<Vec<MeasurementRecord>> {
        let sql = format!(
            r#"
            SELECT {COLUMNS}
            FROM measurements
            WHERE status IN ('pending', 'running')
            ORDER BY created_at ASC
            "#
        );
        let rows = sqlx::query(&sql).fetch_all(self.pool()).await?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn mark_running(&self, id: MeasurementId) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE measurements
            SET status = 'running', updated_at = NOW()
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.to_uuid())
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn complete(
        &self,
        id: MeasurementId,
        outcome: &CompletedMeasurement,
    ) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE measurements
            SET status = 'completed',
                download_mbps = $2,
                upload_mbps = $3,
                latency_ms = $4,
                screenshot_path = $5,
                export_path = $6,
                archive_path = $7,
                error = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.to_uuid())
        .bind(outcome.values.download)
        .bind(outcome.values.upload)
        .bind(outcome.values.latency)
        .bind(path_text(outcome.screenshot_path.as_deref()))
        .bind(path_text(outcome.export_path.as_deref()))
        .bind(path_text(outcome.archive_path.as_deref()))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail(&self, id: MeasurementId, error: &str) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE measurements
            SET status = 'failed', error = $2, updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'running')
            "#,
        )
        .bind(id.to_uuid())
        .bind(error)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn fail_stale(
        &self,
        cutoff: DateTime<Utc>,
        error: &str,
        exclude: Option<MeasurementId>,
    ) -> StorageResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE measurements
            SET status = 'failed', error = $2, updated_at = NOW()
            WHERE status IN ('pending', 'running')
              AND created_at < $1
              AND ($3::uuid IS NULL OR id <> $3)
            "#,
        )
        .bind(cutoff)
        .bind(error)
        .bind(exclude.map(|id| id.to_uuid()))
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
