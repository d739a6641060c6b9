use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::WorkspaceDirectoryRepository;
use sqlx::{Row, SqlitePool};

pub struct SqliteWorkspaceDirectoryRepository {
    pool: SqlitePool,
}

impl SqliteWorkspaceDirectoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkspaceDirectoryRepository for SqliteWorkspaceDirectoryRepository {
    async fn upsert_project(&self, project_id: i64, workspace_id: i64) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workspace_projects (id, workspace_id)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET workspace_id = excluded.workspace_id
            "#,
        )
        .bind(project_id)
        .bind(workspace_id)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;
        Ok(())
    }

    async fn add_member(&self, workspace_id: i64, user_id: i64) -> SchedulerResult<()> {
        sqlx::query(
            "INSERT INTO workspace_members (workspace_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(workspace_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;
        Ok(())
    }

    async fn project_workspaces(&self, project_ids: &[i64]) -> SchedulerResult<HashMap<i64, i64>> {
        let mut workspaces = HashMap::with_capacity(project_ids.len());
        for &project_id in project_ids {
            let row = sqlx::query("SELECT workspace_id FROM workspace_projects WHERE id = $1")
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(SchedulerError::Database)?;
            if let Some(row) = row {
                workspaces.insert(project_id, row.try_get("workspace_id")?);
            }
        }
        Ok(workspaces)
    }

    async fn members_of(
        &self,
        workspace_id: i64,
        user_ids: &[i64],
    ) -> SchedulerResult<HashSet<i64>> {
        let mut members = HashSet::with_capacity(user_ids.len());
        for &user_id in user_ids {
            let row = sqlx::query(
                "SELECT COUNT(*) AS total FROM workspace_members WHERE workspace_id = $1 AND user_id = $2",
            )
            .bind(workspace_id)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;
            if row.try_get::<i64, _>("total")? > 0 {
                members.insert(user_id);
            }
        }
        Ok(members)
    }
}
