use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    LockToken, NewScheduledEvent, ScheduledEvent, ScheduledEventRepository, ScheduledEventStats,
};
use serde_json::Value;
use sqlx::{postgres::PgRow, types::Json, Row, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

pub struct PostgresScheduledEventRepository {
    pool: PgPool,
}

impl PostgresScheduledEventRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 事件无法修改或删除的原因
    async fn unmodifiable(&self, id: Uuid) -> SchedulerResult<SchedulerError> {
        Ok(match self.find_by_id(id).await? {
            Some(event) if event.processed => SchedulerError::ScheduledEventAlreadyProcessed { id },
            Some(_) => SchedulerError::ScheduledEventClaimed { id },
            None => SchedulerError::ScheduledEventNotFound { id },
        })
    }

    fn row_to_event(row: &PgRow) -> SchedulerResult<ScheduledEvent> {
        Ok(ScheduledEvent {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            payload: row.try_get::<Json<Value>, _>("payload")?.0,
            due_at: row.try_get("due_at")?,
            processed: row.try_get("processed")?,
            lock_id: row.try_get("lock_id")?,
            locked_at: row.try_get("locked_at")?,
            retry_count: row.try_get("retry_count")?,
            last_error: row.try_get("last_error")?,
            last_retry_at: row.try_get("last_retry_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl ScheduledEventRepository for PostgresScheduledEventRepository {
    #[instrument(skip(self, event), fields(user_id = event.user_id, due_at = %event.due_at))]
    async fn create(&self, event: &NewScheduledEvent) -> SchedulerResult<ScheduledEvent> {
        let row = sqlx::query(
            r#"
            INSERT INTO scheduled_events (id, user_id, payload, due_at, processed, retry_count, created_at)
            VALUES ($1, $2, $3, $4, FALSE, 0, $5)
            RETURNING id, user_id, payload, due_at, processed, lock_id, locked_at,
                      retry_count, last_error, last_retry_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.user_id)
        .bind(Json(&event.payload))
        .bind(event.due_at)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        let created = Self::row_to_event(&row)?;
        debug!("创建定时事件成功: {}", created.entity_description());
        Ok(created)
    }

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<ScheduledEvent>> {
        let row = sqlx::query(
            "SELECT id, user_id, payload, due_at, processed, lock_id, locked_at,
                    retry_count, last_error, last_retry_at, created_at
             FROM scheduled_events WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(Some(Self::row_to_event(&row)?)),
            None => Ok(None),
        }
    }

    async fn find_eligible(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<ScheduledEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, payload, due_at, processed, lock_id, locked_at,
                   retry_count, last_error, last_retry_at, created_at
            FROM scheduled_events
            WHERE processed = FALSE
              AND due_at <= $1
              AND (lock_id IS NULL OR locked_at IS NULL OR locked_at < $2)
            ORDER BY due_at ASC, seq ASC
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(stale_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        rows.iter().map(Self::row_to_event).collect()
    }

    async fn mark_processed(&self, id: Uuid, token: &LockToken) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE scheduled_events
            SET processed = TRUE, lock_id = NULL, locked_at = NULL, last_error = NULL
            WHERE id = $1 AND lock_id = $2 AND processed = FALSE
            "#,
        )
        .bind(id)
        .bind(token.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::lock_lost("scheduled_events", id));
        }

        debug!("定时事件已处理: {}", id);
        Ok(())
    }

    async fn record_failure(
        &self,
        id: Uuid,
        token: &LockToken,
        error: &str,
        now: DateTime<Utc>,
    ) -> SchedulerResult<i32> {
        let row = sqlx::query(
            r#"
            UPDATE scheduled_events
            SET lock_id = NULL,
                locked_at = NULL,
                retry_count = retry_count + 1,
                last_error = $3,
                last_retry_at = $4
            WHERE id = $1 AND lock_id = $2 AND processed = FALSE
            RETURNING retry_count
            "#,
        )
        .bind(id)
        .bind(token.as_uuid())
        .bind(error)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Ok(row.try_get("retry_count")?),
            None => Err(SchedulerError::lock_lost("scheduled_events", id)),
        }
    }

    async fn reschedule(
        &self,
        id: Uuid,
        due_at: DateTime<Utc>,
        payload: Option<&Value>,
        stale_before: DateTime<Utc>,
    ) -> SchedulerResult<ScheduledEvent> {
        // 清除已过期的领取, 原持有者的迟到写入会因令牌不匹配而失败
        let row = sqlx::query(
            r#"
            UPDATE scheduled_events
            SET due_at = $2,
                payload = COALESCE($3, payload),
                lock_id = NULL,
                locked_at = NULL
            WHERE id = $1
              AND processed = FALSE
              AND (lock_id IS NULL OR locked_at IS NULL OR locked_at < $4)
            RETURNING id, user_id, payload, due_at, processed, lock_id, locked_at,
                      retry_count, last_error, last_retry_at, created_at
            "#,
        )
        .bind(id)
        .bind(due_at)
        .bind(payload.map(Json))
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        match row {
            Some(row) => Self::row_to_event(&row),
            None => Err(self.unmodifiable(id).await?),
        }
    }

    async fn delete_unprocessed(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM scheduled_events
            WHERE id = $1
              AND processed = FALSE
              AND (lock_id IS NULL OR locked_at IS NULL OR locked_at < $2)
            "#,
        )
        .bind(id)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn stats(&self, now: DateTime<Utc>) -> SchedulerResult<ScheduledEventStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(CASE WHEN processed = FALSE THEN 1 END) AS pending,
                COUNT(CASE WHEN processed = FALSE AND due_at <= $1 THEN 1 END) AS due,
                COUNT(CASE WHEN processed = TRUE THEN 1 END) AS processed_count,
                COUNT(CASE WHEN processed = FALSE AND retry_count > 0 THEN 1 END) AS failing
            FROM scheduled_events
            "#,
        )
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(SchedulerError::Database)?;

        Ok(ScheduledEventStats {
            pending: row.try_get("pending")?,
            due: row.try_get("due")?,
            processed: row.try_get("processed_count")?,
            failing: row.try_get("failing")?,
        })
    }
}
