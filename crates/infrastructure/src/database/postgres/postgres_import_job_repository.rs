use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    ImportJob, ImportJobRepository, ImportJobStatus, ImportProgress, JobFailure, LockToken,
    NewImportJob,
};
use serde_json::Value;
use sqlx::{postgres::PgRow, types::Json, Row, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct PostgresImportJobRepository {
    pool: PgPool,
}

impl PostgresImportJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &PgRow) -> SchedulerResult<ImportJob> {
        Ok(ImportJob {
            id: row.try_get("id")?,
            linear_connection_id: row.try_get("linear_connection_id")?,
            workspace_id: row.try_get("workspace_id")?,
            created_by_user_id: row.try_get("created_by_user_id")?,
            status: row.try_get("status")?,
            params: row.try_get::<Json<Value>, _>("params")?.0,
            progress: row.try_get::<Json<Value>, _>("progress")?.0,
            last_error: row.try_get("last_error")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            lock_id: row.try_get("lock_id")?,
            locked_at: row.try_get("locked_at")?,
            retry_count: row.try_get("retry_count")?,
            last_retry_at: row.try_get("last_retry_at")?,
            retry_after: row.try_get("retry_after")?,
        })
    }

    fn ensure_written(rows_affected: u64, id: Uuid) -> SchedulerResult<()> {
        if rows_affected == 0 {
            return Err(SchedulerError::lock_lost("linear_import_jobs", id));
        }
        Ok(())
    }
}

#[async_trait]
impl ImportJobRepository for PostgresImportJobRepository {
    #[instrument(skip(self, job), fields(
        connection_id = job.linear_connection_id,
        workspace_id = job.workspace_id,
    ))]
    async fn create(&self, job: &NewImportJob) -> SchedulerResult<ImportJob> {
        let row = sqlx::query(
            r#"
            INSERT INTO linear_import_jobs (id, linear_connection_id, workspace_id, created_by_user_id,
                                            status, params, progress, retry_count, created_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6, 0, $7)
            RETURNING id, linear_connection_id, workspace_id, created_by_user_id, status, params,
                      progress, last_error, created_at, started_at, finished_at, lock_id, locked_at,
                      retry_count, last_retry_at, retry_after
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job.linear_connection_id)
        .bind(job.workspace_id)
        .bind(job.created_by_user_id)
        .bind(Json(&job.params))
        .bind(Json(ImportProgress::default()))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let created = Self::row_to_job(&row)?;
        debug!("创建导入任务成功: {}", created.entity_description());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<ImportJob>> {
        let row = sqlx::query(
            "SELECT id, linear_connection_id, workspace_id, created_by_user_id, status, params,
                    progress, last_error, created_at, started_at, finished_at, lock_id, locked_at,
                    retry_count, last_retry_at, retry_after
             FROM linear_import_jobs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_claimable(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<ImportJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, linear_connection_id, workspace_id, created_by_user_id, status, params,
                   progress, last_error, created_at, started_at, finished_at, lock_id, locked_at,
                   retry_count, last_retry_at, retry_after
            FROM linear_import_jobs
            WHERE status IN ('pending', 'running')
              AND (lock_id IS NULL OR locked_at IS NULL OR locked_at < $2)
              AND (retry_after IS NULL OR retry_after <= $1)
            ORDER BY created_at ASC, seq ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn find_by_status(
        &self,
        status: ImportJobStatus,
        limit: i64,
    ) -> SchedulerResult<Vec<ImportJob>> {
        let rows = sqlx::query(
            r#"
            SELECT id, linear_connection_id, workspace_id, created_by_user_id, status, params,
                   progress, last_error, created_at, started_at, finished_at, lock_id, locked_at,
                   retry_count, last_retry_at, retry_after
            FROM linear_import_jobs
            WHERE status = $1
            ORDER BY created_at ASC, seq ASC
            LIMIT $2
            "#,
        )
        .bind(status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn save_checkpoint(
        &self,
        id: Uuid,
        token: &LockToken,
        progress: &ImportProgress,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE linear_import_jobs
            SET progress = $3, status = 'pending', lock_id = NULL, locked_at = NULL
            WHERE id = $1 AND lock_id = $2 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(token.as_uuid())
        .bind(Json(progress))
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Self::ensure_written(result.rows_affected(), id)?;
        debug!("导入任务检查点已保存: {} (已处理页数: {})", id, progress.pages_processed());
        Ok(())
    }

    async fn mark_succeeded(
        &self,
        id: Uuid,
        token: &LockToken,
        progress: &ImportProgress,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE linear_import_jobs
            SET status = 'succeeded',
                progress = $3,
                finished_at = $4,
                last_error = NULL,
                retry_after = NULL,
                lock_id = NULL,
                locked_at = NULL
            WHERE id = $1 AND lock_id = $2 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(token.as_uuid())
        .bind(Json(progress))
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Self::ensure_written(result.rows_affected(), id)?;
        debug!("导入任务已完成: {}", id);
        Ok(())
    }

    async fn mark_failure(
        &self,
        id: Uuid,
        token: &LockToken,
        failure: &JobFailure,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        let query = match failure {
            JobFailure::Retry { error, retry_after } => sqlx::query(
                r#"
                UPDATE linear_import_jobs
                SET status = 'pending',
                    retry_count = retry_count + 1,
                    last_error = $3,
                    last_retry_at = $4,
                    retry_after = $5,
                    lock_id = NULL,
                    locked_at = NULL
                WHERE id = $1 AND lock_id = $2 AND status = 'running'
                "#,
            )
            .bind(id)
            .bind(token.as_uuid())
            .bind(error.as_str())
            .bind(now)
            .bind(*retry_after),
            JobFailure::Exhausted { error } => sqlx::query(
                r#"
                UPDATE linear_import_jobs
                SET status = 'failed',
                    retry_count = retry_count + 1,
                    last_error = $3,
                    last_retry_at = $4,
                    finished_at = $4,
                    retry_after = NULL,
                    lock_id = NULL,
                    locked_at = NULL
                WHERE id = $1 AND lock_id = $2 AND status = 'running'
                "#,
            )
            .bind(id)
            .bind(token.as_uuid())
            .bind(error.as_str())
            .bind(now),
            JobFailure::Fatal { error } => sqlx::query(
                r#"
                UPDATE linear_import_jobs
                SET status = 'failed',
                    last_error = $3,
                    finished_at = $4,
                    retry_after = NULL,
                    lock_id = NULL,
                    locked_at = NULL
                WHERE id = $1 AND lock_id = $2 AND status = 'running'
                "#,
            )
            .bind(id)
            .bind(token.as_uuid())
            .bind(error.as_str())
            .bind(now),
        };

        let result = query
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        Self::ensure_written(result.rows_affected(), id)?;
        debug!("导入任务失败已记录: {} ({})", id, failure.error());
        Ok(())
    }
}
