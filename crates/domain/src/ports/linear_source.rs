use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::entities::LinearConnection;
use scheduler_core::SchedulerResult;

/// 外部系统中的工作项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearIssue {
    pub id: String,
    pub identifier: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<i32>,
    /// `YYYY-MM-DD`
    pub due_date: Option<String>,
    pub state_type: Option<String>,
    pub state_name: Option<String>,
    pub assignee_email: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuePageRequest {
    /// 为空表示不按项目过滤
    pub project_ids: Vec<String>,
    pub cursor: Option<String>,
    pub page_size: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IssuePage {
    pub issues: Vec<LinearIssue>,
    /// 为空表示已到最后一页
    pub next_cursor: Option<String>,
}

/// 分页读取外部工作项
///
/// 实现需要区分错误类型: 限流、5xx和网络错误返回
/// `SchedulerError::ExternalTransient`, 凭证被拒返回 `SchedulerError::ExternalRejected`。
#[async_trait]
pub trait LinearSource: Send + Sync {
    async fn fetch_issues(
        &self,
        connection: &LinearConnection,
        request: &IssuePageRequest,
    ) -> SchedulerResult<IssuePage>;
}
