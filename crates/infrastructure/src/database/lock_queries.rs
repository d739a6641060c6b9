//! 行级租约锁的SQL
//!
//! 两种数据库共用同一组语句, 参数统一使用 `$N` 占位符。
//! 领取语句的参数: `$1` 新令牌, `$2` 当前时间, `$3` 记录ID, `$4` 租约过期临界时间。

use scheduler_domain::LockTarget;

pub fn claim_sql(target: LockTarget) -> &'static str {
    match target {
        LockTarget::ScheduledEvent => {
            r#"
            UPDATE scheduled_events
            SET lock_id = $1, locked_at = $2
            WHERE id = $3
              AND processed = FALSE
              AND due_at <= $2
              AND (lock_id IS NULL OR locked_at IS NULL OR locked_at < $4)
            "#
        }
        LockTarget::ImportJob => {
            r#"
            UPDATE linear_import_jobs
            SET lock_id = $1,
                locked_at = $2,
                status = 'running',
                started_at = COALESCE(started_at, $2)
            WHERE id = $3
              AND status IN ('pending', 'running')
              AND (retry_after IS NULL OR retry_after <= $2)
              AND (lock_id IS NULL OR locked_at IS NULL OR locked_at < $4)
            "#
        }
    }
}

/// 参数: `$1` 记录ID, `$2` 令牌
pub fn release_sql(target: LockTarget) -> &'static str {
    match target {
        LockTarget::ScheduledEvent => {
            "UPDATE scheduled_events SET lock_id = NULL, locked_at = NULL WHERE id = $1 AND lock_id = $2"
        }
        // 释放后的任务回到可继续的pending状态
        LockTarget::ImportJob => {
            r#"
            UPDATE linear_import_jobs
            SET lock_id = NULL,
                locked_at = NULL,
                status = CASE WHEN status = 'running' THEN 'pending' ELSE status END
            WHERE id = $1 AND lock_id = $2
            "#
        }
    }
}

/// 参数: `$1` 记录ID, `$2` 令牌
pub fn is_held_sql(target: LockTarget) -> &'static str {
    match target {
        LockTarget::ScheduledEvent => {
            "SELECT COUNT(*) AS held FROM scheduled_events WHERE id = $1 AND lock_id = $2"
        }
        LockTarget::ImportJob => {
            "SELECT COUNT(*) AS held FROM linear_import_jobs WHERE id = $1 AND lock_id = $2"
        }
    }
}
