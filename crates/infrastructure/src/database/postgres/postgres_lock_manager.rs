use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{stale_before, Lease, LockManager, LockTarget, LockToken};
use sqlx::{Row, PgPool};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::database::lock_queries::{claim_sql, is_held_sql, release_sql};

pub struct PostgresLockManager {
    pool: PgPool,
}

impl PostgresLockManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LockManager for PostgresLockManager {
    #[instrument(skip(self), fields(target = %target, record_id = %record_id))]
    async fn try_claim(
        &self,
        target: LockTarget,
        record_id: Uuid,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Lease>> {
        let token = LockToken::generate();

        let result = sqlx::query(claim_sql(target))
            .bind(token.as_uuid())
            .bind(now)
            .bind(record_id)
            .bind(stale_before(now, lease_duration))
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        if result.rows_affected() == 0 {
            debug!("领取失败, 记录已被占用或不可领取: {} {}", target, record_id);
            return Ok(None);
        }

        debug!("领取成功: {} {} 令牌 {}", target, record_id, token);
        Ok(Some(Lease {
            target,
            record_id,
            token,
            acquired_at: now,
            duration: lease_duration,
        }))
    }

    async fn release(&self, lease: &Lease) -> SchedulerResult<bool> {
        let result = sqlx::query(release_sql(lease.target))
            .bind(lease.record_id)
            .bind(lease.token.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_held(&self, lease: &Lease) -> SchedulerResult<bool> {
        let row = sqlx::query(is_held_sql(lease.target))
            .bind(lease.record_id)
            .bind(lease.token.as_uuid())
            .fetch_one(&self.pool)
            .await
            .map_err(SchedulerError::Database)?;

        let held: i64 = row.try_get("held")?;
        Ok(held > 0)
    }
}
