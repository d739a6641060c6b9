use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{ImportMismatch, ImportMismatchRepository, NewImportMismatch};
use serde_json::Value;
use sqlx::{postgres::PgRow, types::Json, Row, PgPool};
use tracing::debug;
use uuid::Uuid;

pub struct PostgresImportMismatchRepository {
    pool: PgPool,
}

impl PostgresImportMismatchRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_mismatch(row: &PgRow) -> SchedulerResult<ImportMismatch> {
        Ok(ImportMismatch {
            id: row.try_get("id")?,
            job_id: row.try_get("job_id")?,
            mismatch_type: row.try_get("mismatch_type")?,
            message: row.try_get("message")?,
            payload: row.try_get::<Json<Value>, _>("payload")?.0,
            dedup_key: row.try_get("dedup_key")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ImportMismatchRepository for PostgresImportMismatchRepository {
    async fn record(&self, mismatch: &NewImportMismatch) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO linear_import_mismatches (job_id, "type", message, payload, dedup_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (job_id, dedup_key) DO NOTHING
            "#,
        )
        .bind(mismatch.job_id)
        .bind(&mismatch.mismatch_type)
        .bind(&mismatch.message)
        .bind(Json(&mismatch.payload))
        .bind(&mismatch.dedup_key)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let inserted = result.rows_affected() > 0;
        if !inserted {
            debug!("导入冲突已存在, 跳过: {} {}", mismatch.job_id, mismatch.dedup_key);
        }
        Ok(inserted)
    }

    async fn find_by_job_id(&self, job_id: Uuid) -> SchedulerResult<Vec<ImportMismatch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, job_id, "type" AS mismatch_type, message, payload, dedup_key, created_at
            FROM linear_import_mismatches
            WHERE job_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_mismatch).collect()
    }

    async fn count_by_job_id(&self, job_id: Uuid) -> SchedulerResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM linear_import_mismatches WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        Ok(row.try_get("total")?)
    }
}
