use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{LinearConnection, LinearConnectionRepository, NewLinearConnection};
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use tracing::debug;

pub struct SqliteLinearConnectionRepository {
    pool: SqlitePool,
}

impl SqliteLinearConnectionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn row_to_connection(row: &SqliteRow) -> SchedulerResult<LinearConnection> {
        Ok(LinearConnection {
            id: row.try_get("id")?,
            workspace_id: row.try_get("workspace_id")?,
            user_id: row.try_get("user_id")?,
            linear_org_id: row.try_get("linear_org_id")?,
            linear_org_name: row.try_get("linear_org_name")?,
            access_token: row.try_get("access_token")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
            revoked_at: row.try_get("revoked_at")?,
        })
    }
}

#[async_trait]
impl LinearConnectionRepository for SqliteLinearConnectionRepository {
    async fn create(&self, connection: &NewLinearConnection) -> SchedulerResult<LinearConnection> {
        let row = sqlx::query(
            r#"
            INSERT INTO linear_connections (workspace_id, user_id, linear_org_id, linear_org_name,
                                            access_token, status, created_at)
            VALUES ($1, $2, $3, $4, $5, 'active', $6)
            RETURNING id, workspace_id, user_id, linear_org_id, linear_org_name, access_token,
                      status, created_at, revoked_at
            "#,
        )
        .bind(connection.workspace_id)
        .bind(connection.user_id)
        .bind(&connection.linear_org_id)
        .bind(&connection.linear_org_name)
        .bind(&connection.access_token)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let created = Self::row_to_connection(&row)?;
        debug!("创建Linear连接成功: ID {}", created.id);
        Ok(created)
    }

    async fn find_by_id(&self, id: i64) -> SchedulerResult<Option<LinearConnection>> {
        let row = sqlx::query(
            "SELECT id, workspace_id, user_id, linear_org_id, linear_org_name, access_token,
                    status, created_at, revoked_at
             FROM linear_connections WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_connection(&row)?)),
            None => Ok(None),
        }
    }

    async fn revoke(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<bool> {
        let result = sqlx::query(
            "UPDATE linear_connections SET status = 'revoked', revoked_at = $2 WHERE id = $1 AND status = 'active'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected() > 0)
    }
}
