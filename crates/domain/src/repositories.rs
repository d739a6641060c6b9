//! 领域仓储抽象
//!
//! 所有对已领取记录的写入都携带领取令牌, 令牌不匹配时返回
//! `SchedulerError::LockLost` 且不产生任何修改。

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::{
    ImportJob, ImportJobStatus, ImportMismatch, ImportedIssue, LinearConnection,
    NewImportJob, NewImportMismatch, NewImportedIssue, NewLinearConnection, NewScheduledEvent,
    ScheduledEvent,
};
use crate::value_objects::{
    ImportProgress, JobFailure, Lease, LockTarget, LockToken, ScheduledEventStats,
    UpsertOutcome,
};
use scheduler_core::SchedulerResult;

/// 行级租约锁
#[async_trait]
pub trait LockManager: Send + Sync {
    /// 仅当记录未被领取或已有租约过期时成功, 并写入新令牌和领取时间。
    /// 记录不满足目标类型的可领取条件时同样返回 `None`。
    async fn try_claim(
        &self,
        target: LockTarget,
        record_id: Uuid,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> SchedulerResult<Option<Lease>>;

    /// 令牌不匹配时不做任何修改并返回false
    async fn release(&self, lease: &Lease) -> SchedulerResult<bool>;

    /// 记录当前是否仍由该租约持有
    async fn is_held(&self, lease: &Lease) -> SchedulerResult<bool>;
}

/// 定时事件仓储
#[async_trait]
pub trait ScheduledEventRepository: Send + Sync {
    async fn create(&self, event: &NewScheduledEvent) -> SchedulerResult<ScheduledEvent>;

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<ScheduledEvent>>;

    /// 未处理、已到期且不在有效租约内的事件, 按 `due_at` 升序, 同时间按插入顺序
    async fn find_eligible(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<ScheduledEvent>>;

    /// 标记已处理并释放锁
    async fn mark_processed(&self, id: Uuid, token: &LockToken) -> SchedulerResult<()>;

    /// 释放锁并记录失败, 返回累计失败次数
    async fn record_failure(
        &self,
        id: Uuid,
        token: &LockToken,
        error: &str,
        now: DateTime<Utc>,
    ) -> SchedulerResult<i32>;

    /// 修改未处理事件的到期时间和内容
    ///
    /// 租约仍有效(`locked_at >= stale_before`)的事件返回 `ScheduledEventClaimed`;
    /// 已过期的领取会被清除, 原持有者的后续写入将得到 `LockLost`。
    async fn reschedule(
        &self,
        id: Uuid,
        due_at: DateTime<Utc>,
        payload: Option<&Value>,
        stale_before: DateTime<Utc>,
    ) -> SchedulerResult<ScheduledEvent>;

    /// 删除未处理且不在有效租约中的事件
    async fn delete_unprocessed(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> SchedulerResult<bool>;

    async fn stats(&self, now: DateTime<Utc>) -> SchedulerResult<ScheduledEventStats>;
}

/// 导入任务仓储
#[async_trait]
pub trait ImportJobRepository: Send + Sync {
    async fn create(&self, job: &NewImportJob) -> SchedulerResult<ImportJob>;

    async fn find_by_id(&self, id: Uuid) -> SchedulerResult<Option<ImportJob>>;

    /// 可领取的任务: pending或租约过期的running, 已过退避时间, 按 `created_at` 升序
    async fn find_claimable(
        &self,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
        limit: i64,
    ) -> SchedulerResult<Vec<ImportJob>>;

    async fn find_by_status(
        &self,
        status: ImportJobStatus,
        limit: i64,
    ) -> SchedulerResult<Vec<ImportJob>>;

    /// 持久化检查点并释放锁, 任务回到可继续的pending状态
    async fn save_checkpoint(
        &self,
        id: Uuid,
        token: &LockToken,
        progress: &ImportProgress,
    ) -> SchedulerResult<()>;

    async fn mark_succeeded(
        &self,
        id: Uuid,
        token: &LockToken,
        progress: &ImportProgress,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()>;

    /// 按失败类型写回状态并释放锁, 进度保持不变
    async fn mark_failure(
        &self,
        id: Uuid,
        token: &LockToken,
        failure: &JobFailure,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()>;
}

/// 导入冲突记录仓储
#[async_trait]
pub trait ImportMismatchRepository: Send + Sync {
    /// 追加一条记录; 相同 `(job_id, dedup_key)` 已存在时返回false
    async fn record(&self, mismatch: &NewImportMismatch) -> SchedulerResult<bool>;

    async fn find_by_job_id(&self, job_id: Uuid) -> SchedulerResult<Vec<ImportMismatch>>;

    async fn count_by_job_id(&self, job_id: Uuid) -> SchedulerResult<i64>;
}

/// Linear连接仓储
#[async_trait]
pub trait LinearConnectionRepository: Send + Sync {
    async fn create(&self, connection: &NewLinearConnection) -> SchedulerResult<LinearConnection>;

    async fn find_by_id(&self, id: i64) -> SchedulerResult<Option<LinearConnection>>;

    async fn revoke(&self, id: i64, now: DateTime<Utc>) -> SchedulerResult<bool>;
}

/// 导入的本地工作项仓储
#[async_trait]
pub trait ImportedIssueRepository: Send + Sync {
    /// 以 `(connection_id, external_id)` 去重写入
    async fn upsert(&self, issue: &NewImportedIssue) -> SchedulerResult<UpsertOutcome>;

    async fn find_by_external_id(
        &self,
        connection_id: i64,
        external_id: &str,
    ) -> SchedulerResult<Option<ImportedIssue>>;

    async fn count_by_connection(&self, connection_id: i64) -> SchedulerResult<i64>;
}

/// 本地项目与工作区成员目录, 导入时用于校验映射目标
#[async_trait]
pub trait WorkspaceDirectoryRepository: Send + Sync {
    /// 登记本地项目, 已存在时更新所属工作区
    async fn upsert_project(&self, project_id: i64, workspace_id: i64) -> SchedulerResult<()>;

    async fn add_member(&self, workspace_id: i64, user_id: i64) -> SchedulerResult<()>;

    /// 查询项目所属工作区, 未登记的项目不出现在结果中
    async fn project_workspaces(&self, project_ids: &[i64]) -> SchedulerResult<HashMap<i64, i64>>;

    /// 返回给定用户中属于该工作区的成员
    async fn members_of(
        &self,
        workspace_id: i64,
        user_ids: &[i64],
    ) -> SchedulerResult<HashSet<i64>>;
}
