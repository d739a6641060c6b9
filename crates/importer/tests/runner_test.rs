use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    ImportJobStatus, ImportParams, ImportProgress, IssuePage, IssuePageRequest, LinearConnection,
    LinearIssue, LinearSource, LockTarget, NewImportJob, NewLinearConnection,
};
use scheduler_importer::{
    ImportPipelineRunner, ImportStep, RetryPolicy, RunnerSettings, StepContext,
};
use scheduler_infrastructure::{DatabaseManager, MetricsCollector};

const LEASE: Duration = Duration::from_secs(300);

/// 按游标分页返回固定数据的Linear数据源, 支持注入故障和延迟
struct FakeLinearSource {
    pages: Vec<Vec<LinearIssue>>,
    faults: Mutex<VecDeque<SchedulerError>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeLinearSource {
    fn new(pages: Vec<Vec<LinearIssue>>) -> Self {
        Self {
            pages,
            faults: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_faults(self, faults: Vec<SchedulerError>) -> Self {
        *self.faults.lock().unwrap() = faults.into();
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LinearSource for FakeLinearSource {
    async fn fetch_issues(
        &self,
        _connection: &LinearConnection,
        request: &IssuePageRequest,
    ) -> SchedulerResult<IssuePage> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(fault) = self.faults.lock().unwrap().pop_front() {
            return Err(fault);
        }

        let index = match request.cursor.as_deref() {
            None => 0,
            Some(cursor) => cursor
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| SchedulerError::ExternalRejected(format!("bad cursor {cursor}")))?,
        };
        let issues = self.pages.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1));
        Ok(IssuePage {
            issues,
            next_cursor,
        })
    }
}

fn linear_issue(id: &str, project_id: &str) -> LinearIssue {
    LinearIssue {
        id: id.to_string(),
        identifier: Some(id.to_uppercase()),
        title: format!("Issue {id}"),
        description: None,
        priority: Some(1),
        due_date: None,
        state_type: Some("unstarted".to_string()),
        state_name: Some("Todo".to_string()),
        assignee_email: None,
        project_id: Some(project_id.to_string()),
    }
}

fn two_pages() -> Vec<Vec<LinearIssue>> {
    (0..2)
        .map(|page| {
            (0..10)
                .map(|n| linear_issue(&format!("iss-{page}-{n}"), "lp-1"))
                .collect()
        })
        .collect()
}

fn import_params() -> Value {
    json!({
        "importAll": true,
        "mappings": { "projects": { "lp-1": 100 }, "users": {} }
    })
}

fn settings() -> RunnerSettings {
    RunnerSettings {
        poll_interval: Duration::from_millis(50),
        lease_duration: LEASE,
        batch_size: 10,
        steps_per_cycle: 4,
        page_size: 10,
    }
}

fn runner(
    db: &DatabaseManager,
    source: Arc<dyn LinearSource>,
    policy: RetryPolicy,
    settings: RunnerSettings,
) -> ImportPipelineRunner {
    ImportPipelineRunner::new(
        db.import_job_repository(),
        db.linear_connection_repository(),
        db.imported_issue_repository(),
        db.import_mismatch_repository(),
        db.workspace_directory_repository(),
        db.lock_manager(),
        source,
        Arc::new(MetricsCollector::new()),
        policy,
        settings,
    )
}

async fn setup(db: &DatabaseManager, params: Value) -> Result<(i64, Uuid)> {
    db.workspace_directory_repository()
        .upsert_project(100, 7)
        .await?;
    let connection = db
        .linear_connection_repository()
        .create(&NewLinearConnection {
            workspace_id: 7,
            user_id: 42,
            linear_org_id: "org_1".to_string(),
            linear_org_name: Some("Acme".to_string()),
            access_token: "lin_oauth_test".to_string(),
        })
        .await?;
    let job = db
        .import_job_repository()
        .create(&NewImportJob::new(connection.id, 7, 42, params))
        .await?;
    Ok((connection.id, job.id))
}

async fn job_status(db: &DatabaseManager, job_id: Uuid) -> Result<ImportJobStatus> {
    Ok(db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists")
        .status)
}

#[tokio::test]
async fn test_two_page_import_with_unmapped_issue() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (connection_id, job_id) = setup(&db, import_params()).await?;

    let mut pages = two_pages();
    pages[1][4] = linear_issue("iss-1-4", "lp-unknown");
    let source = Arc::new(FakeLinearSource::new(pages));
    let runner = runner(&db, source.clone(), RetryPolicy::default(), settings());

    let report = runner.run_cycle().await?;
    assert_eq!(report.selected, 1);
    assert_eq!(report.steps, 2);
    assert_eq!(report.succeeded, 1);

    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    assert_eq!(job.status, ImportJobStatus::Succeeded);
    assert!(job.finished_at.is_some());
    assert!(job.lock_id.is_none());

    let progress = ImportProgress::from_value(&job.progress)?;
    assert!(progress.is_finished());
    assert_eq!(progress.pages_processed(), 2);
    assert_eq!(progress.snapshot().issues_imported, 19);
    assert_eq!(progress.snapshot().issues_skipped, 1);

    assert_eq!(
        db.imported_issue_repository()
            .count_by_connection(connection_id)
            .await?,
        19
    );
    let mismatches = db.import_mismatch_repository().find_by_job_id(job_id).await?;
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].mismatch_type, "unmapped_project");
    assert_eq!(mismatches[0].payload["linearIssueId"], "iss-1-4");

    // 成功的任务不会再被选中
    let report = runner.run_cycle().await?;
    assert_eq!(report.selected, 0);
    assert_eq!(source.calls(), 2);

    Ok(())
}

#[tokio::test]
async fn test_steps_per_cycle_checkpoints_between_cycles() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (_, job_id) = setup(&db, import_params()).await?;
    let source = Arc::new(FakeLinearSource::new(two_pages()));
    let runner = runner(
        &db,
        source,
        RetryPolicy::default(),
        RunnerSettings {
            steps_per_cycle: 1,
            ..settings()
        },
    );

    let report = runner.run_cycle().await?;
    assert_eq!(report.steps, 1);
    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    assert_eq!(job.status, ImportJobStatus::Pending);
    assert!(job.lock_id.is_none());
    let progress = ImportProgress::from_value(&job.progress)?;
    assert_eq!(progress.pages_processed(), 1);
    assert_eq!(progress.cursor(), Some("page-1"));

    runner.run_cycle().await?;
    assert_eq!(job_status(&db, job_id).await?, ImportJobStatus::Succeeded);

    Ok(())
}

#[tokio::test]
async fn test_step_replay_is_idempotent() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (connection_id, job_id) = setup(&db, import_params()).await?;

    let mut pages = two_pages();
    pages[0][3] = linear_issue("iss-0-3", "lp-unknown");
    let step = ImportStep::new(
        Arc::new(FakeLinearSource::new(pages)),
        db.lock_manager(),
        db.imported_issue_repository(),
        db.import_mismatch_repository(),
        db.workspace_directory_repository(),
        10,
    );

    let lease = db
        .lock_manager()
        .try_claim(LockTarget::ImportJob, job_id, LEASE, Utc::now())
        .await?
        .expect("claim");
    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    let connection = db
        .linear_connection_repository()
        .find_by_id(connection_id)
        .await?
        .expect("connection exists");
    let params = ImportParams::from_value(&job.params)?;
    let progress = ImportProgress::default();

    let first = step
        .execute(StepContext {
            job: &job,
            connection: &connection,
            params: &params,
            progress: &progress,
            lease: &lease,
        })
        .await?;
    let second = step
        .execute(StepContext {
            job: &job,
            connection: &connection,
            params: &params,
            progress: &progress,
            lease: &lease,
        })
        .await?;

    assert_eq!(first.summary.issues_imported, 9);
    assert_eq!(first.summary.mismatches_recorded, 1);
    assert_eq!(second.summary.issues_imported, 0);
    assert_eq!(second.summary.issues_existing, 9);
    assert_eq!(second.summary.mismatches_recorded, 0);
    assert_eq!(first.progress.cursor(), second.progress.cursor());

    assert_eq!(
        db.imported_issue_repository()
            .count_by_connection(connection_id)
            .await?,
        9
    );
    assert_eq!(db.import_mismatch_repository().count_by_job_id(job_id).await?, 1);

    Ok(())
}

#[tokio::test]
async fn test_crash_before_checkpoint_resumes_without_skipping() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (connection_id, job_id) = setup(&db, import_params()).await?;
    let source = Arc::new(FakeLinearSource::new(two_pages()));

    // 第一个实例写入了第一页但在保存检查点前崩溃
    let t0 = Utc::now();
    let crashed = db
        .lock_manager()
        .try_claim(LockTarget::ImportJob, job_id, LEASE, t0)
        .await?
        .expect("claim");
    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    let connection = db
        .linear_connection_repository()
        .find_by_id(connection_id)
        .await?
        .expect("connection exists");
    let params = ImportParams::from_value(&job.params)?;
    let step = ImportStep::new(
        source.clone(),
        db.lock_manager(),
        db.imported_issue_repository(),
        db.import_mismatch_repository(),
        db.workspace_directory_repository(),
        10,
    );
    step.execute(StepContext {
        job: &job,
        connection: &connection,
        params: &params,
        progress: &ImportProgress::default(),
        lease: &crashed,
    })
    .await?;

    let runner = runner(&db, source, RetryPolicy::default(), settings());

    // 租约未过期时任务不可见
    let report = runner.run_cycle_at(t0 + ChronoDuration::seconds(10)).await?;
    assert_eq!(report.selected, 0);

    let report = runner
        .run_cycle_at(t0 + ChronoDuration::seconds(301))
        .await?;
    assert_eq!(report.succeeded, 1);

    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    assert_eq!(job.status, ImportJobStatus::Succeeded);
    let progress = ImportProgress::from_value(&job.progress)?;
    assert_eq!(progress.pages_processed(), 2);
    assert_eq!(progress.snapshot().issues_existing, 10);
    assert_eq!(progress.snapshot().issues_imported, 10);
    assert_eq!(
        db.imported_issue_repository()
            .count_by_connection(connection_id)
            .await?,
        20
    );

    // 崩溃实例的令牌已失效
    let result = db
        .import_job_repository()
        .save_checkpoint(job_id, &crashed.token, &ImportProgress::default())
        .await;
    assert!(matches!(result, Err(SchedulerError::LockLost { .. })));

    Ok(())
}

#[tokio::test]
async fn test_transient_failure_backs_off_then_resumes() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (_, job_id) = setup(&db, import_params()).await?;
    let source = Arc::new(
        FakeLinearSource::new(two_pages())
            .with_faults(vec![SchedulerError::ExternalTransient("429".to_string())]),
    );
    let runner = runner(&db, source, RetryPolicy::default(), settings());

    let t0 = Utc::now();
    let report = runner.run_cycle_at(t0).await?;
    assert_eq!(report.retried, 1);

    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    assert_eq!(job.status, ImportJobStatus::Pending);
    assert_eq!(job.retry_count, 1);
    let last_retry_at = job.last_retry_at.expect("last_retry_at set");
    assert!(last_retry_at >= t0 && last_retry_at < t0 + ChronoDuration::seconds(5));
    let retry_after: DateTime<Utc> = job.retry_after.expect("retry_after set");
    assert!(retry_after >= t0 + ChronoDuration::seconds(60));
    assert_eq!(ImportProgress::from_value(&job.progress)?, ImportProgress::default());

    let report = runner.run_cycle_at(t0 + ChronoDuration::seconds(30)).await?;
    assert_eq!(report.selected, 0);

    let report = runner
        .run_cycle_at(t0 + ChronoDuration::seconds(120))
        .await?;
    assert_eq!(report.succeeded, 1);
    assert_eq!(job_status(&db, job_id).await?, ImportJobStatus::Succeeded);

    Ok(())
}

#[tokio::test]
async fn test_retry_budget_exhaustion_is_terminal() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (_, job_id) = setup(&db, import_params()).await?;
    let source = Arc::new(FakeLinearSource::new(two_pages()).with_faults(
        (0..10)
            .map(|_| SchedulerError::ExternalTransient("503".to_string()))
            .collect(),
    ));
    let policy = RetryPolicy {
        max_retries: 2,
        ..Default::default()
    };
    let runner = runner(&db, source.clone(), policy, settings());

    let t0 = Utc::now();
    let mut reports = Vec::new();
    for minutes in [0, 10, 20] {
        reports.push(runner.run_cycle_at(t0 + ChronoDuration::minutes(minutes)).await?);
    }
    assert_eq!(reports[0].retried, 1);
    assert_eq!(reports[1].retried, 1);
    assert_eq!(reports[2].failed, 1);

    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    assert_eq!(job.status, ImportJobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert!(job.last_error.as_deref().is_some_and(|e| e.contains("503")));

    // 失败是终态
    let report = runner.run_cycle_at(t0 + ChronoDuration::days(1)).await?;
    assert_eq!(report.selected, 0);
    assert_eq!(source.calls(), 3);

    Ok(())
}

#[tokio::test]
async fn test_inactive_connection_fails_without_retry() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (connection_id, job_id) = setup(&db, import_params()).await?;
    db.linear_connection_repository()
        .revoke(connection_id, Utc::now())
        .await?;

    let source = Arc::new(FakeLinearSource::new(two_pages()));
    let runner = runner(&db, source.clone(), RetryPolicy::default(), settings());

    let report = runner.run_cycle().await?;
    assert_eq!(report.failed, 1);
    assert_eq!(source.calls(), 0);

    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    assert_eq!(job.status, ImportJobStatus::Failed);
    assert_eq!(job.retry_count, 0);
    assert!(job.last_error.is_some());
    assert!(job.finished_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_credential_rejection_is_terminal() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (_, job_id) = setup(&db, import_params()).await?;
    let source = Arc::new(FakeLinearSource::new(two_pages()).with_faults(vec![
        SchedulerError::ExternalRejected("Linear API返回状态码 401".to_string()),
    ]));
    let runner = runner(&db, source, RetryPolicy::default(), settings());

    let report = runner.run_cycle().await?;
    assert_eq!(report.failed, 1);

    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    assert_eq!(job.status, ImportJobStatus::Failed);
    assert!(job.last_error.as_deref().is_some_and(|e| e.contains("401")));

    let report = runner.run_cycle_at(Utc::now() + ChronoDuration::days(1)).await?;
    assert_eq!(report.selected, 0);

    Ok(())
}

#[tokio::test]
async fn test_invalid_params_fail_the_job() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (_, job_id) = setup(&db, json!({"importAll": false, "projectIds": []})).await?;
    let runner = runner(
        &db,
        Arc::new(FakeLinearSource::new(two_pages())),
        RetryPolicy::default(),
        settings(),
    );

    let report = runner.run_cycle().await?;
    assert_eq!(report.failed, 1);
    assert_eq!(job_status(&db, job_id).await?, ImportJobStatus::Failed);

    Ok(())
}

#[tokio::test]
async fn test_step_timeout_is_transient() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (_, job_id) = setup(&db, import_params()).await?;
    let source =
        Arc::new(FakeLinearSource::new(two_pages()).with_delay(Duration::from_millis(500)));
    let runner = runner(
        &db,
        source,
        RetryPolicy::default(),
        RunnerSettings {
            lease_duration: Duration::from_millis(50),
            ..settings()
        },
    );

    let report = runner.run_cycle().await?;
    assert_eq!(report.retried, 1);

    let job = db
        .import_job_repository()
        .find_by_id(job_id)
        .await?
        .expect("job exists");
    assert_eq!(job.status, ImportJobStatus::Pending);
    assert_eq!(job.retry_count, 1);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_issue_within_page_is_recorded_once() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (connection_id, job_id) = setup(&db, import_params()).await?;

    let page = vec![
        linear_issue("iss-a", "lp-1"),
        linear_issue("iss-a", "lp-1"),
        linear_issue("iss-b", "lp-1"),
    ];
    let runner = runner(
        &db,
        Arc::new(FakeLinearSource::new(vec![page])),
        RetryPolicy::default(),
        settings(),
    );

    runner.run_cycle().await?;
    assert_eq!(job_status(&db, job_id).await?, ImportJobStatus::Succeeded);
    assert_eq!(
        db.imported_issue_repository()
            .count_by_connection(connection_id)
            .await?,
        2
    );
    let mismatches = db.import_mismatch_repository().find_by_job_id(job_id).await?;
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].mismatch_type, "duplicate_entity");

    Ok(())
}

#[tokio::test]
async fn test_concurrent_runners_import_each_issue_once() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (connection_id, job_id) = setup(&db, import_params()).await?;
    let source = Arc::new(FakeLinearSource::new(two_pages()));

    let first = runner(&db, source.clone(), RetryPolicy::default(), settings());
    let second = runner(&db, source.clone(), RetryPolicy::default(), settings());

    let (a, b) = tokio::join!(first.run_cycle(), second.run_cycle());
    let (a, b) = (a?, b?);
    assert_eq!(a.succeeded + b.succeeded, 1);
    assert_eq!(a.failed + b.failed, 0);

    assert_eq!(job_status(&db, job_id).await?, ImportJobStatus::Succeeded);
    assert_eq!(
        db.imported_issue_repository()
            .count_by_connection(connection_id)
            .await?,
        20
    );

    Ok(())
}

#[tokio::test]
async fn test_later_step_in_cycle_is_not_taken_over_early() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let (connection_id, job_id) = setup(&db, import_params()).await?;
    let source =
        Arc::new(FakeLinearSource::new(two_pages()).with_delay(Duration::from_millis(700)));

    // 第二步在本轮开始约700ms后领取, 其租约应从领取时刻起算
    let short_lease = RunnerSettings {
        lease_duration: Duration::from_secs(1),
        steps_per_cycle: 2,
        ..settings()
    };
    let first = runner(&db, source.clone(), RetryPolicy::default(), short_lease.clone());
    let second = runner(&db, source.clone(), RetryPolicy::default(), short_lease);

    let (a, b) = tokio::join!(first.run_cycle(), async {
        tokio::time::sleep(Duration::from_millis(1100)).await;
        second.run_cycle().await
    });
    let (a, b) = (a?, b?);

    assert_eq!(a.steps, 2);
    assert_eq!(a.succeeded, 1);
    assert_eq!(a.lost_locks, 0);
    assert_eq!(b.selected, 0);
    assert_eq!(source.calls(), 2);

    assert_eq!(job_status(&db, job_id).await?, ImportJobStatus::Succeeded);
    assert_eq!(
        db.imported_issue_repository()
            .count_by_connection(connection_id)
            .await?,
        20
    );

    Ok(())
}

#[tokio::test]
async fn test_mapping_targets_are_checked_against_workspace_directory() -> Result<()> {
    let db = DatabaseManager::in_memory().await?;
    let params = json!({
        "importAll": true,
        "mappings": {
            "projects": { "lp-1": 100, "lp-foreign": 200, "lp-gone": 999 },
            "users": { "alice@example.com": 42, "bob@example.com": 43 }
        }
    });
    let (connection_id, job_id) = setup(&db, params).await?;
    let directory = db.workspace_directory_repository();
    directory.upsert_project(200, 8).await?;
    directory.add_member(7, 42).await?;
    directory.add_member(8, 43).await?;

    let mut known = linear_issue("iss-known", "lp-1");
    known.assignee_email = Some("alice@example.com".to_string());
    let mut unknown = linear_issue("iss-unknown", "lp-1");
    unknown.assignee_email = Some("ghost@example.com".to_string());
    let mut outsider = linear_issue("iss-outsider", "lp-1");
    outsider.assignee_email = Some("bob@example.com".to_string());
    let foreign = linear_issue("iss-foreign", "lp-foreign");
    let gone = linear_issue("iss-gone", "lp-gone");

    let runner = runner(
        &db,
        Arc::new(FakeLinearSource::new(vec![vec![
            known, unknown, outsider, foreign, gone,
        ]])),
        RetryPolicy::default(),
        settings(),
    );
    let report = runner.run_cycle().await?;
    assert_eq!(report.succeeded, 1);

    let issues = db.imported_issue_repository();
    let assigned = issues
        .find_by_external_id(connection_id, "iss-known")
        .await?
        .expect("issue exists");
    assert_eq!(assigned.assignee_user_id, Some(42));
    for external_id in ["iss-unknown", "iss-outsider"] {
        let unassigned = issues
            .find_by_external_id(connection_id, external_id)
            .await?
            .expect("issue exists");
        assert_eq!(unassigned.assignee_user_id, None);
    }
    assert!(issues
        .find_by_external_id(connection_id, "iss-foreign")
        .await?
        .is_none());
    assert!(issues
        .find_by_external_id(connection_id, "iss-gone")
        .await?
        .is_none());
    assert_eq!(issues.count_by_connection(connection_id).await?, 3);

    let mismatches: HashMap<String, String> = db
        .import_mismatch_repository()
        .find_by_job_id(job_id)
        .await?
        .into_iter()
        .map(|m| (m.dedup_key, m.mismatch_type))
        .collect();
    assert_eq!(mismatches.len(), 4);
    assert_eq!(
        mismatches.get("unmatched_assignee:iss-unknown").map(String::as_str),
        Some("unmatched_assignee")
    );
    assert_eq!(
        mismatches
            .get("assignee_not_workspace_member:iss-outsider")
            .map(String::as_str),
        Some("assignee_not_workspace_member")
    );
    assert_eq!(
        mismatches
            .get("mapped_epic_project_wrong_workspace:iss-foreign")
            .map(String::as_str),
        Some("mapped_epic_project_wrong_workspace")
    );
    assert_eq!(
        mismatches
            .get("mapped_epic_project_not_found:iss-gone")
            .map(String::as_str),
        Some("mapped_epic_project_not_found")
    );

    Ok(())
}
