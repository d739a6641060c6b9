use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entities::{ImportJob, ImportJobStatus};
use scheduler_core::{SchedulerError, SchedulerResult};

/// 领取令牌, 每次成功领取都会生成新的全局唯一值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// 可被领取的记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockTarget {
    ScheduledEvent,
    ImportJob,
}

impl LockTarget {
    pub fn table_name(&self) -> &'static str {
        match self {
            LockTarget::ScheduledEvent => "scheduled_events",
            LockTarget::ImportJob => "linear_import_jobs",
        }
    }
}

impl fmt::Display for LockTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table_name())
    }
}

/// 一次成功领取得到的租约
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub target: LockTarget,
    pub record_id: Uuid,
    pub token: LockToken,
    pub acquired_at: DateTime<Utc>,
    pub duration: Duration,
}

impl Lease {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at
            .checked_add_signed(to_chrono(self.duration))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at()
    }

    pub fn lost(&self) -> SchedulerError {
        SchedulerError::lock_lost(self.target.table_name(), self.record_id)
    }
}

/// 计算租约过期的临界时间: `locked_at` 早于该时间的领取已失效
pub fn stale_before(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(to_chrono(lease))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

pub fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

/// 一轮轮询的时钟
///
/// 以轮询开始时刻 `base` 为起点, 按真实流逝的时间推进。领取、退避等写入
/// 都应使用 `now()`, 这样本轮中较晚发生的领取不会带着过时的 `locked_at`。
#[derive(Debug, Clone, Copy)]
pub struct CycleClock {
    base: DateTime<Utc>,
    started: Instant,
}

impl CycleClock {
    pub fn start(base: DateTime<Utc>) -> Self {
        Self {
            base,
            started: Instant::now(),
        }
    }

    pub fn base(&self) -> DateTime<Utc> {
        self.base
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.base
            .checked_add_signed(to_chrono(self.started.elapsed()))
            .unwrap_or(self.base)
    }
}

/// 导入参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ImportParams {
    pub import_all: bool,
    pub project_ids: Vec<String>,
    pub mappings: ImportMappings,
    /// 未映射项目的工作项落入该项目
    pub default_project_id: Option<i64>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportMappings {
    /// Linear项目ID -> 本地项目ID
    pub projects: HashMap<String, i64>,
    /// 邮箱 -> 本地用户ID
    pub users: HashMap<String, i64>,
}

impl ImportParams {
    pub fn from_value(value: &Value) -> SchedulerResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        let params: ImportParams = serde_json::from_value(value.clone())
            .map_err(|e| SchedulerError::InvalidImportParams(e.to_string()))?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if !self.import_all && self.project_ids.is_empty() {
            return Err(SchedulerError::InvalidImportParams(
                "未指定导入项目且未开启全部导入".to_string(),
            ));
        }
        if let Some(0) = self.page_size {
            return Err(SchedulerError::InvalidImportParams(
                "分页大小必须大于0".to_string(),
            ));
        }
        Ok(())
    }

    /// 全部导入时不过滤项目
    pub fn project_filter(&self) -> Vec<String> {
        if self.import_all {
            Vec::new()
        } else {
            self.project_ids.clone()
        }
    }
}

/// 单步导入的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    pub next_cursor: Option<String>,
    pub issues_seen: u64,
    pub issues_imported: u64,
    pub issues_existing: u64,
    pub issues_skipped: u64,
    pub mismatches_recorded: u64,
}

/// 导入进度检查点 (v1)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressV1 {
    /// 下一页的游标, 为空表示从头开始
    pub cursor: Option<String>,
    pub pages_processed: u32,
    pub issues_seen: u64,
    pub issues_imported: u64,
    pub issues_existing: u64,
    pub issues_skipped: u64,
    pub mismatches_recorded: u64,
    pub finished: bool,
}

/// 版本化的导入进度
///
/// 序列化为 `{"version": "v1", ...}`。旧任务的 `{}` 或 `null` 视为全新进度,
/// 未知版本视为无效检查点。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum ImportProgress {
    #[serde(rename = "v1")]
    V1(ProgressV1),
}

impl Default for ImportProgress {
    fn default() -> Self {
        ImportProgress::V1(ProgressV1::default())
    }
}

impl ImportProgress {
    pub fn from_value(value: &Value) -> SchedulerResult<Self> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(map) if map.is_empty() => Ok(Self::default()),
            other => serde_json::from_value(other.clone())
                .map_err(|e| SchedulerError::InvalidCheckpoint(e.to_string())),
        }
    }

    pub fn to_value(&self) -> SchedulerResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn snapshot(&self) -> &ProgressV1 {
        match self {
            ImportProgress::V1(progress) => progress,
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        self.snapshot().cursor.as_deref()
    }

    pub fn is_finished(&self) -> bool {
        self.snapshot().finished
    }

    pub fn pages_processed(&self) -> u32 {
        self.snapshot().pages_processed
    }

    /// 每一步都推进已处理页数, 检查点因此严格单调递增
    pub fn advance(&self, page: &PageSummary) -> ImportProgress {
        let current = self.snapshot();
        ImportProgress::V1(ProgressV1 {
            cursor: page.next_cursor.clone(),
            pages_processed: current.pages_processed + 1,
            issues_seen: current.issues_seen + page.issues_seen,
            issues_imported: current.issues_imported + page.issues_imported,
            issues_existing: current.issues_existing + page.issues_existing,
            issues_skipped: current.issues_skipped + page.issues_skipped,
            mismatches_recorded: current.mismatches_recorded + page.mismatches_recorded,
            finished: page.next_cursor.is_none(),
        })
    }
}

/// 导入冲突类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MismatchKind {
    UnmappedProject,
    /// 映射目标项目在本地不存在
    MappedProjectNotFound,
    /// 映射目标项目属于其他工作区
    MappedProjectWrongWorkspace,
    InvalidIssue,
    UnmatchedAssignee,
    /// 负责人有对应的本地用户, 但不是该工作区成员
    AssigneeNotWorkspaceMember,
    DuplicateEntity,
}

impl MismatchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MismatchKind::UnmappedProject => "unmapped_project",
            MismatchKind::MappedProjectNotFound => "mapped_epic_project_not_found",
            MismatchKind::MappedProjectWrongWorkspace => "mapped_epic_project_wrong_workspace",
            MismatchKind::InvalidIssue => "invalid_issue",
            MismatchKind::UnmatchedAssignee => "unmatched_assignee",
            MismatchKind::AssigneeNotWorkspaceMember => "assignee_not_workspace_member",
            MismatchKind::DuplicateEntity => "duplicate_entity",
        }
    }

    /// 为false时工作项照常导入, 冲突仅作记录
    pub fn skips_entity(&self) -> bool {
        !matches!(
            self,
            MismatchKind::UnmatchedAssignee | MismatchKind::AssigneeNotWorkspaceMember
        )
    }
}

impl fmt::Display for MismatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 导入任务失败的处理方式
#[derive(Debug, Clone, PartialEq)]
pub enum JobFailure {
    /// 可恢复: 回到pending, 在 `retry_after` 之前不可领取
    Retry {
        error: String,
        retry_after: DateTime<Utc>,
    },
    /// 重试预算耗尽
    Exhausted { error: String },
    /// 配置或凭证问题, 不重试
    Fatal { error: String },
}

impl JobFailure {
    pub fn error(&self) -> &str {
        match self {
            JobFailure::Retry { error, .. }
            | JobFailure::Exhausted { error }
            | JobFailure::Fatal { error } => error,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobFailure::Retry { .. })
    }
}

/// 本地实体写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(i64),
    Existing(i64),
}

impl UpsertOutcome {
    pub fn id(&self) -> i64 {
        match self {
            UpsertOutcome::Created(id) | UpsertOutcome::Existing(id) => *id,
        }
    }
}

/// 对外暴露的导入任务状态
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub id: Uuid,
    pub status: ImportJobStatus,
    pub progress: Value,
    pub last_error: Option<String>,
    pub retry_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&ImportJob> for JobStatusView {
    fn from(job: &ImportJob) -> Self {
        Self {
            id: job.id,
            status: job.status,
            progress: job.progress.clone(),
            last_error: job.last_error.clone(),
            retry_count: job.retry_count,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// 定时事件统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScheduledEventStats {
    pub pending: i64,
    pub due: i64,
    pub processed: i64,
    /// 至少失败过一次且仍未处理
    pub failing: i64,
}
