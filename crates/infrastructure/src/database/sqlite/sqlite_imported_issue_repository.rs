use async_trait::async_trait;
use chrono::Utc;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{ImportedIssue, ImportedIssueRepository, NewImportedIssue, UpsertOutcome};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};

pub struct SqliteImportedIssueRepository {
    pool: SqlitePool,
}

impl SqliteImportedIssueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_issue(row: &SqliteRow) -> SchedulerResult<ImportedIssue> {
        Ok(ImportedIssue {
            id: row.try_get("id")?,
            connection_id: row.try_get("connection_id")?,
            external_id: row.try_get("external_id")?,
            workspace_id: row.try_get("workspace_id")?,
            project_id: row.try_get("project_id")?,
            title: row.try_get("title")?,
            description: row.try_get("description")?,
            status: row.try_get("status")?,
            priority: row.try_get("priority")?,
            due_date: row.try_get("due_date")?,
            assignee_user_id: row.try_get("assignee_user_id")?,
            import_job_id: row.try_get("import_job_id")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ImportedIssueRepository for SqliteImportedIssueRepository {
    async fn upsert(&self, issue: &NewImportedIssue) -> SchedulerResult<UpsertOutcome> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO imported_issues (connection_id, external_id, workspace_id, project_id, title,
                                         description, status, priority, due_date, assignee_user_id,
                                         import_job_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (connection_id, external_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(issue.connection_id)
        .bind(&issue.external_id)
        .bind(issue.workspace_id)
        .bind(issue.project_id)
        .bind(&issue.title)
        .bind(&issue.description)
        .bind(issue.status)
        .bind(issue.priority)
        .bind(issue.due_date)
        .bind(issue.assignee_user_id)
        .bind(issue.import_job_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if let Some(row) = inserted {
            return Ok(UpsertOutcome::Created(row.try_get("id")?));
        }

        let row = sqlx::query("SELECT id FROM imported_issues WHERE connection_id = $1 AND external_id = $2")
            .bind(issue.connection_id)
            .bind(&issue.external_id)
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        Ok(UpsertOutcome::Existing(row.try_get("id")?))
    }

    async fn find_by_external_id(
        &self,
        connection_id: i64,
        external_id: &str,
    ) -> SchedulerResult<Option<ImportedIssue>> {
        let row = sqlx::query(
            "SELECT id, connection_id, external_id, workspace_id, project_id, title, description,
                    status, priority, due_date, assignee_user_id, import_job_id, created_at
             FROM imported_issues WHERE connection_id = $1 AND external_id = $2",
        )
        .bind(connection_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_issue(&row)?)),
            None => Ok(None),
        }
    }

    async fn count_by_connection(&self, connection_id: i64) -> SchedulerResult<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM imported_issues WHERE connection_id = $1")
            .bind(connection_id)
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        Ok(row.try_get("total")?)
    }
}
