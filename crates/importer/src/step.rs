use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tracing::{debug, instrument};

use scheduler_core::SchedulerResult;
use scheduler_domain::{
    ImportJob, ImportMismatchRepository, ImportParams, ImportProgress, ImportedIssueRepository,
    IssuePageRequest, Lease, LinearConnection, LinearSource, LockManager, MismatchKind,
    PageSummary, UpsertOutcome, WorkspaceDirectoryRepository,
};
use scheduler_infrastructure::StructuredLogger;

use crate::mapper::{
    mapped_project_ids, mapped_user_ids, DirectorySnapshot, IssueDecision, IssueMapper,
    MismatchDraft,
};

/// 单步导入的输入
pub struct StepContext<'a> {
    pub job: &'a ImportJob,
    pub connection: &'a LinearConnection,
    pub params: &'a ImportParams,
    pub progress: &'a ImportProgress,
    pub lease: &'a Lease,
}

/// 单步导入的结果, 进度尚未持久化
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    pub progress: ImportProgress,
    pub summary: PageSummary,
}

/// 一个有界的导入步骤: 拉取一页外部工作项并写入本地
///
/// 本地写入以 `(connection_id, external_id)` 去重, 冲突记录以 `(job_id, dedup_key)`
/// 去重, 因此从同一检查点重放步骤不会产生重复数据。
pub struct ImportStep {
    source: Arc<dyn LinearSource>,
    lock_manager: Arc<dyn LockManager>,
    issue_repo: Arc<dyn ImportedIssueRepository>,
    mismatch_repo: Arc<dyn ImportMismatchRepository>,
    directory_repo: Arc<dyn WorkspaceDirectoryRepository>,
    default_page_size: u32,
}

impl ImportStep {
    pub fn new(
        source: Arc<dyn LinearSource>,
        lock_manager: Arc<dyn LockManager>,
        issue_repo: Arc<dyn ImportedIssueRepository>,
        mismatch_repo: Arc<dyn ImportMismatchRepository>,
        directory_repo: Arc<dyn WorkspaceDirectoryRepository>,
        default_page_size: u32,
    ) -> Self {
        Self {
            source,
            lock_manager,
            issue_repo,
            mismatch_repo,
            directory_repo,
            default_page_size,
        }
    }

    #[instrument(skip(self, ctx), fields(job_id = %ctx.job.id, pages = ctx.progress.pages_processed()))]
    pub async fn execute(&self, ctx: StepContext<'_>) -> SchedulerResult<StepOutcome> {
        let request = IssuePageRequest {
            project_ids: ctx.params.project_filter(),
            cursor: ctx.progress.cursor().map(str::to_string),
            page_size: ctx.params.page_size.unwrap_or(self.default_page_size),
        };
        let page = self.source.fetch_issues(ctx.connection, &request).await?;
        debug!(
            "拉取到 {} 个Linear工作项, 下一页: {:?}",
            page.issues.len(),
            page.next_cursor
        );

        // 写入前确认租约仍然有效
        if !self.lock_manager.is_held(ctx.lease).await? {
            return Err(ctx.lease.lost());
        }

        let directory = DirectorySnapshot {
            project_workspaces: self
                .directory_repo
                .project_workspaces(&mapped_project_ids(ctx.params, &page.issues))
                .await?,
            members: self
                .directory_repo
                .members_of(
                    ctx.job.workspace_id,
                    &mapped_user_ids(ctx.params, &page.issues),
                )
                .await?,
        };
        let mapper = IssueMapper::new(
            ctx.params,
            &directory,
            ctx.connection.id,
            ctx.job.workspace_id,
            ctx.job.id,
        );
        let mut summary = PageSummary {
            next_cursor: page.next_cursor.clone(),
            ..Default::default()
        };
        let mut seen = HashSet::new();

        for issue in &page.issues {
            summary.issues_seen += 1;

            if !seen.insert(issue.id.as_str()) {
                summary.issues_skipped += 1;
                let draft = MismatchDraft::new(
                    MismatchKind::DuplicateEntity,
                    &issue.id,
                    format!("同一页中重复的Linear工作项: {}", issue.id),
                    json!({ "linearIssueId": issue.id }),
                );
                self.record(ctx.job, draft, &mut summary).await?;
                continue;
            }

            match mapper.map(issue) {
                IssueDecision::Skip(draft) => {
                    summary.issues_skipped += 1;
                    self.record(ctx.job, draft, &mut summary).await?;
                }
                IssueDecision::Import { issue, warnings } => {
                    match self.issue_repo.upsert(&issue).await? {
                        UpsertOutcome::Created(_) => summary.issues_imported += 1,
                        UpsertOutcome::Existing(_) => summary.issues_existing += 1,
                    }
                    for draft in warnings {
                        self.record(ctx.job, draft, &mut summary).await?;
                    }
                }
            }
        }

        Ok(StepOutcome {
            progress: ctx.progress.advance(&summary),
            summary,
        })
    }

    async fn record(
        &self,
        job: &ImportJob,
        draft: MismatchDraft,
        summary: &mut PageSummary,
    ) -> SchedulerResult<()> {
        let kind = draft.kind;
        let external_id = draft.external_id.clone();
        if self.mismatch_repo.record(&draft.into_record(job.id)).await? {
            summary.mismatches_recorded += 1;
            StructuredLogger::log_mismatch_recorded(job.id, kind.as_str(), &external_id);
        }
        Ok(())
    }
}
