use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use scheduler_core::{ImporterConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    stale_before, CycleClock, ImportJob, ImportJobRepository, ImportMismatchRepository, ImportParams,
    ImportProgress, ImportedIssueRepository, JobFailure, Lease, LinearConnectionRepository,
    LinearSource, LockManager, LockTarget, WorkspaceDirectoryRepository,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::retry_policy::RetryPolicy;
use crate::step::{ImportStep, StepContext};

/// 导入运行器参数
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub poll_interval: Duration,
    /// 单步租约时长, 同时作为单步的超时时间
    pub lease_duration: Duration,
    pub batch_size: i64,
    pub steps_per_cycle: u32,
    pub page_size: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from(&ImporterConfig::default())
    }
}

impl From<&ImporterConfig> for RunnerSettings {
    fn from(config: &ImporterConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            lease_duration: Duration::from_secs(config.lease_seconds),
            batch_size: config.batch_size,
            steps_per_cycle: config.steps_per_cycle.max(1),
            page_size: config.page_size,
        }
    }
}

/// 单轮运行的结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerReport {
    pub selected: usize,
    /// 成功保存检查点或完成的步骤数
    pub steps: usize,
    pub succeeded: usize,
    pub retried: usize,
    pub failed: usize,
    pub contended: usize,
    pub lost_locks: usize,
    pub errors: usize,
}

enum StepResult {
    Checkpointed,
    Succeeded,
}

/// Linear导入流水线运行器
pub struct ImportPipelineRunner {
    job_repo: Arc<dyn ImportJobRepository>,
    connection_repo: Arc<dyn LinearConnectionRepository>,
    lock_manager: Arc<dyn LockManager>,
    step: ImportStep,
    retry_policy: RetryPolicy,
    metrics: Arc<MetricsCollector>,
    settings: RunnerSettings,
}

impl ImportPipelineRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_repo: Arc<dyn ImportJobRepository>,
        connection_repo: Arc<dyn LinearConnectionRepository>,
        issue_repo: Arc<dyn ImportedIssueRepository>,
        mismatch_repo: Arc<dyn ImportMismatchRepository>,
        directory_repo: Arc<dyn WorkspaceDirectoryRepository>,
        lock_manager: Arc<dyn LockManager>,
        source: Arc<dyn LinearSource>,
        metrics: Arc<MetricsCollector>,
        retry_policy: RetryPolicy,
        settings: RunnerSettings,
    ) -> Self {
        let step = ImportStep::new(
            source,
            lock_manager.clone(),
            issue_repo,
            mismatch_repo,
            directory_repo,
            settings.page_size,
        );
        Self {
            job_repo,
            connection_repo,
            lock_manager,
            step,
            retry_policy,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub async fn run_cycle(&self) -> SchedulerResult<RunnerReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// 以指定时间执行一轮
    ///
    /// `now` 决定哪些任务可领取, 每一步的领取、完成和退避都使用 `now` 加上本轮已流逝的时间。
    #[instrument(skip(self))]
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> SchedulerResult<RunnerReport> {
        let started = Instant::now();
        let clock = CycleClock::start(now);
        let jobs = self
            .job_repo
            .find_claimable(
                now,
                stale_before(now, self.settings.lease_duration),
                self.settings.batch_size,
            )
            .await?;

        let mut report = RunnerReport {
            selected: jobs.len(),
            ..Default::default()
        };

        for job in &jobs {
            if job.is_orphaned(stale_before(now, self.settings.lease_duration)) {
                info!("接管租约已过期的导入任务: {}", job.entity_description());
            }
            if let Err(e) = self.process_job(job.id, &clock, &mut report).await {
                error!("处理导入任务 {} 失败: {}", job.id, e);
                StructuredLogger::log_system_error("importer", "process_job", &e);
                report.errors += 1;
            }
        }

        self.metrics
            .record_import_cycle(started.elapsed().as_secs_f64());
        if report.selected > 0 {
            info!(
                "本轮导入完成: 选中 {}, 步数 {}, 完成 {}, 重试 {}, 失败 {}",
                report.selected, report.steps, report.succeeded, report.retried, report.failed
            );
        }
        Ok(report)
    }

    /// 对同一任务最多连续执行 `steps_per_cycle` 步, 每一步都是独立的领取
    async fn process_job(
        &self,
        job_id: Uuid,
        clock: &CycleClock,
        report: &mut RunnerReport,
    ) -> SchedulerResult<()> {
        for _ in 0..self.settings.steps_per_cycle {
            let target = LockTarget::ImportJob;
            let lease = match self
                .lock_manager
                .try_claim(target, job_id, self.settings.lease_duration, clock.now())
                .await?
            {
                Some(lease) => lease,
                None => {
                    self.metrics.record_claim_contention(target.table_name());
                    StructuredLogger::log_claim_contended(target.table_name(), job_id);
                    report.contended += 1;
                    return Ok(());
                }
            };

            let job = match self.job_repo.find_by_id(job_id).await? {
                Some(job) => job,
                None => {
                    warn!("导入任务在领取后消失: {}", job_id);
                    self.lock_manager.release(&lease).await?;
                    return Ok(());
                }
            };

            match self.run_step(&job, &lease, clock).await {
                Ok(StepResult::Checkpointed) => {
                    report.steps += 1;
                }
                Ok(StepResult::Succeeded) => {
                    report.steps += 1;
                    report.succeeded += 1;
                    return Ok(());
                }
                Err(e) if e.is_lost_lock() => {
                    self.on_lock_lost(job_id, "run_step");
                    report.lost_locks += 1;
                    return Ok(());
                }
                Err(e) => {
                    self.handle_failure(&job, &lease, e, clock.now(), report).await?;
                    return Ok(());
                }
            }
        }

        debug!("导入任务 {} 本轮步数已用完", job_id);
        Ok(())
    }

    async fn run_step(
        &self,
        job: &ImportJob,
        lease: &Lease,
        clock: &CycleClock,
    ) -> SchedulerResult<StepResult> {
        let connection = self
            .connection_repo
            .find_by_id(job.linear_connection_id)
            .await?
            .ok_or(SchedulerError::ConnectionNotFound {
                id: job.linear_connection_id,
            })?;
        if !connection.is_active() {
            return Err(SchedulerError::ConnectionInactive {
                id: connection.id,
                status: connection.status.to_string(),
            });
        }

        let params = ImportParams::from_value(&job.params)?;
        let progress = ImportProgress::from_value(&job.progress)?;

        if progress.is_finished() {
            self.complete(job, lease, &progress, clock.now()).await?;
            return Ok(StepResult::Succeeded);
        }

        let step_started = Instant::now();
        let outcome = timeout(
            self.settings.lease_duration,
            self.step.execute(StepContext {
                job,
                connection: &connection,
                params: &params,
                progress: &progress,
                lease,
            }),
        )
        .await
        .map_err(|_| SchedulerError::ExecutionTimeout)??;

        let summary = &outcome.summary;
        self.metrics.record_import_step(
            step_started.elapsed().as_secs_f64(),
            summary.issues_imported,
            summary.mismatches_recorded,
        );
        StructuredLogger::log_import_step(
            job.id,
            outcome.progress.pages_processed(),
            summary.issues_imported,
            summary.issues_existing,
            summary.issues_skipped,
            outcome.progress.is_finished(),
        );

        if outcome.progress.is_finished() {
            self.complete(job, lease, &outcome.progress, clock.now()).await?;
            Ok(StepResult::Succeeded)
        } else {
            self.job_repo
                .save_checkpoint(job.id, &lease.token, &outcome.progress)
                .await?;
            Ok(StepResult::Checkpointed)
        }
    }

    async fn complete(
        &self,
        job: &ImportJob,
        lease: &Lease,
        progress: &ImportProgress,
        now: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        self.job_repo
            .mark_succeeded(job.id, &lease.token, progress, now)
            .await?;
        let snapshot = progress.snapshot();
        self.metrics.record_import_succeeded();
        StructuredLogger::log_import_succeeded(
            job.id,
            snapshot.issues_imported,
            snapshot.mismatches_recorded,
        );
        Ok(())
    }

    async fn handle_failure(
        &self,
        job: &ImportJob,
        lease: &Lease,
        error: SchedulerError,
        now: DateTime<Utc>,
        report: &mut RunnerReport,
    ) -> SchedulerResult<()> {
        let failure = self.retry_policy.classify(&error, job.retry_count, now);

        match self
            .job_repo
            .mark_failure(job.id, &lease.token, &failure, now)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_lost_lock() => {
                self.on_lock_lost(job.id, "mark_failure");
                report.lost_locks += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        match &failure {
            JobFailure::Retry { error, retry_after } => {
                self.metrics.record_import_retry();
                StructuredLogger::log_import_retry(
                    job.id,
                    job.retry_count + 1,
                    self.retry_policy.max_retries,
                    *retry_after,
                    error,
                );
                report.retried += 1;
            }
            JobFailure::Exhausted { error } => {
                self.metrics.record_import_failed();
                StructuredLogger::log_import_failed(job.id, job.retry_count + 1, error);
                report.failed += 1;
            }
            JobFailure::Fatal { error } => {
                self.metrics.record_import_failed();
                StructuredLogger::log_import_failed(job.id, job.retry_count, error);
                report.failed += 1;
            }
        }
        Ok(())
    }

    fn on_lock_lost(&self, job_id: Uuid, operation: &str) {
        let target = LockTarget::ImportJob.table_name();
        self.metrics.record_lost_lock(target);
        StructuredLogger::log_lock_lost(target, job_id, operation);
    }

    /// 按固定间隔循环运行, 直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut poll_interval = interval(self.settings.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "导入运行器已启动, 轮询间隔 {:?}, 每轮最多 {} 步",
            self.settings.poll_interval, self.settings.steps_per_cycle
        );

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("导入运行失败: {}", e);
                        StructuredLogger::log_system_error("importer", "run_cycle", &e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("导入运行器正在关闭");
                    break;
                }
            }
        }
    }
}
