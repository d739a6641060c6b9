use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// 定时事件
///
/// `processed = false` 且 `due_at <= now` 的事件处于可触发状态。
/// 重试相关字段只用于监控, 不影响可触发性。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledEvent {
    pub id: Uuid,
    pub user_id: i64,
    pub payload: Value,
    pub due_at: DateTime<Utc>,
    pub processed: bool,
    pub lock_id: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledEvent {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.processed && self.due_at <= now
    }

    pub fn is_locked(&self) -> bool {
        self.lock_id.is_some()
    }

    pub fn entity_description(&self) -> String {
        format!("定时事件 {} (用户: {})", self.id, self.user_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledEvent {
    pub user_id: i64,
    pub payload: Value,
    pub due_at: DateTime<Utc>,
}

impl NewScheduledEvent {
    pub fn new(user_id: i64, payload: Value, due_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            payload,
            due_at,
        }
    }
}

/// 导入任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportJobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl ImportJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportJobStatus::Pending => "pending",
            ImportJobStatus::Running => "running",
            ImportJobStatus::Succeeded => "succeeded",
            ImportJobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ImportJobStatus::Pending),
            "running" => Some(ImportJobStatus::Running),
            "succeeded" => Some(ImportJobStatus::Succeeded),
            "failed" => Some(ImportJobStatus::Failed),
            _ => None,
        }
    }

    /// 终态不会再被调度
    pub fn is_terminal(&self) -> bool {
        matches!(self, ImportJobStatus::Succeeded | ImportJobStatus::Failed)
    }
}

impl std::fmt::Display for ImportJobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear导入任务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportJob {
    pub id: Uuid,
    pub linear_connection_id: i64,
    pub workspace_id: i64,
    pub created_by_user_id: i64,
    pub status: ImportJobStatus,
    pub params: Value,
    pub progress: Value,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lock_id: Option<Uuid>,
    pub locked_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    /// `last_retry_at + backoff(retry_count)`, 之前不可再次领取
    pub retry_after: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 租约已过期的运行中任务视为孤儿任务
    pub fn is_orphaned(&self, stale_before: DateTime<Utc>) -> bool {
        self.status == ImportJobStatus::Running
            && self.locked_at.map_or(true, |locked_at| locked_at < stale_before)
    }

    pub fn entity_description(&self) -> String {
        format!(
            "导入任务 {} (连接: {}, 工作区: {})",
            self.id, self.linear_connection_id, self.workspace_id
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewImportJob {
    pub linear_connection_id: i64,
    pub workspace_id: i64,
    pub created_by_user_id: i64,
    pub params: Value,
}

impl NewImportJob {
    pub fn new(
        linear_connection_id: i64,
        workspace_id: i64,
        created_by_user_id: i64,
        params: Value,
    ) -> Self {
        Self {
            linear_connection_id,
            workspace_id,
            created_by_user_id,
            params,
        }
    }
}

/// 导入冲突记录, 只追加不修改
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportMismatch {
    pub id: i64,
    pub job_id: Uuid,
    pub mismatch_type: String,
    pub message: String,
    pub payload: Value,
    pub dedup_key: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewImportMismatch {
    pub job_id: Uuid,
    pub mismatch_type: String,
    pub message: String,
    pub payload: Value,
    /// 同一任务内相同的key只记录一次, 重放的步骤不会产生重复记录
    pub dedup_key: String,
}

/// Linear连接状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Active,
    Revoked,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Active => "active",
            ConnectionStatus::Revoked => "revoked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConnectionStatus::Active),
            "revoked" => Some(ConnectionStatus::Revoked),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Linear连接
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinearConnection {
    pub id: i64,
    pub workspace_id: i64,
    pub user_id: i64,
    pub linear_org_id: String,
    pub linear_org_name: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub status: ConnectionStatus,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl LinearConnection {
    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLinearConnection {
    pub workspace_id: i64,
    pub user_id: i64,
    pub linear_org_id: String,
    pub linear_org_name: Option<String>,
    pub access_token: String,
}

/// 本地工作项状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueStatus {
    Todo,
    Doing,
    Done,
}

impl IssueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IssueStatus::Todo => "todo",
            IssueStatus::Doing => "doing",
            IssueStatus::Done => "done",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "todo" => Some(IssueStatus::Todo),
            "doing" => Some(IssueStatus::Doing),
            "done" => Some(IssueStatus::Done),
            _ => None,
        }
    }
}

/// 由导入步骤创建的本地工作项, 以 `(connection_id, external_id)` 去重
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImportedIssue {
    pub id: i64,
    pub connection_id: i64,
    pub external_id: String,
    pub workspace_id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: IssueStatus,
    pub priority: Option<i32>,
    pub due_date: Option<NaiveDate>,
    pub assignee_user_id: Option<i64>,
    pub import_job_id: Uuid,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewImportedIssue {
    pub connection_id: i64,
    pub external_id: String,
    pub workspace_id: i64,
    pub project_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub status: IssueStatus,
    pub priority: Option<i32>,
    pub due_date: Option<NaiveDate>,
    pub assignee_user_id: Option<i64>,
    pub import_job_id: Uuid,
}
