//! 面向生产者和观察者的服务

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    stale_before, ImportJob, ImportJobRepository, ImportJobStatus, ImportMismatch,
    ImportMismatchRepository, ImportParams, JobStatusView, LinearConnectionRepository,
    NewImportJob, NewScheduledEvent, ScheduledEvent, ScheduledEventRepository,
    ScheduledEventStats,
};

/// 写入定时事件和导入任务
#[derive(Clone)]
pub struct ProducerService {
    event_repo: Arc<dyn ScheduledEventRepository>,
    job_repo: Arc<dyn ImportJobRepository>,
    connection_repo: Arc<dyn LinearConnectionRepository>,
    /// 分发器的租约时长, 用于判断事件是否正在触发
    event_lease: Duration,
}

impl ProducerService {
    pub fn new(
        event_repo: Arc<dyn ScheduledEventRepository>,
        job_repo: Arc<dyn ImportJobRepository>,
        connection_repo: Arc<dyn LinearConnectionRepository>,
        event_lease: Duration,
    ) -> Self {
        Self {
            event_repo,
            job_repo,
            connection_repo,
            event_lease,
        }
    }

    /// 新建定时事件, 到期时间可以是过去的时间
    #[instrument(skip(self, payload))]
    pub async fn enqueue_scheduled_event(
        &self,
        user_id: i64,
        payload: Value,
        due_at: DateTime<Utc>,
    ) -> SchedulerResult<ScheduledEvent> {
        let event = self
            .event_repo
            .create(&NewScheduledEvent::new(user_id, payload, due_at))
            .await?;
        info!("定时事件已创建: {}", event.entity_description());
        Ok(event)
    }

    /// 新建导入任务
    ///
    /// 连接必须存在且处于active状态, 参数必须能解析。任务以pending状态创建,
    /// 进度为空。
    #[instrument(skip(self, params))]
    pub async fn enqueue_import_job(
        &self,
        connection_id: i64,
        workspace_id: i64,
        created_by_user_id: i64,
        params: Value,
    ) -> SchedulerResult<ImportJob> {
        let connection = self
            .connection_repo
            .find_by_id(connection_id)
            .await?
            .ok_or(SchedulerError::ConnectionNotFound { id: connection_id })?;
        if !connection.is_active() {
            return Err(SchedulerError::ConnectionInactive {
                id: connection.id,
                status: connection.status.to_string(),
            });
        }
        ImportParams::from_value(&params)?;

        let job = self
            .job_repo
            .create(&NewImportJob::new(
                connection_id,
                workspace_id,
                created_by_user_id,
                params,
            ))
            .await?;
        info!("导入任务已创建: {}", job.entity_description());
        Ok(job)
    }

    /// 修改未处理事件的到期时间, 可同时替换内容
    ///
    /// 正在触发的事件返回 `ScheduledEventClaimed`。
    pub async fn reschedule_event(
        &self,
        id: Uuid,
        due_at: DateTime<Utc>,
        payload: Option<Value>,
    ) -> SchedulerResult<ScheduledEvent> {
        self.event_repo
            .reschedule(
                id,
                due_at,
                payload.as_ref(),
                stale_before(Utc::now(), self.event_lease),
            )
            .await
    }

    /// 取消未处理的事件, 已处理或正在触发的事件不可取消
    pub async fn cancel_scheduled_event(&self, id: Uuid) -> SchedulerResult<()> {
        if self
            .event_repo
            .delete_unprocessed(id, stale_before(Utc::now(), self.event_lease))
            .await?
        {
            info!("定时事件已取消: {}", id);
            return Ok(());
        }
        match self.event_repo.find_by_id(id).await? {
            Some(event) if event.processed => {
                Err(SchedulerError::ScheduledEventAlreadyProcessed { id })
            }
            Some(_) => Err(SchedulerError::ScheduledEventClaimed { id }),
            None => Err(SchedulerError::ScheduledEventNotFound { id }),
        }
    }
}

/// 只读查询: 任务状态、冲突记录和事件统计
#[derive(Clone)]
pub struct JobObserver {
    event_repo: Arc<dyn ScheduledEventRepository>,
    job_repo: Arc<dyn ImportJobRepository>,
    mismatch_repo: Arc<dyn ImportMismatchRepository>,
}

impl JobObserver {
    pub fn new(
        event_repo: Arc<dyn ScheduledEventRepository>,
        job_repo: Arc<dyn ImportJobRepository>,
        mismatch_repo: Arc<dyn ImportMismatchRepository>,
    ) -> Self {
        Self {
            event_repo,
            job_repo,
            mismatch_repo,
        }
    }

    pub async fn job_status(&self, id: Uuid) -> SchedulerResult<JobStatusView> {
        self.job_repo
            .find_by_id(id)
            .await?
            .map(|job| JobStatusView::from(&job))
            .ok_or(SchedulerError::ImportJobNotFound { id })
    }

    pub async fn jobs_by_status(
        &self,
        status: ImportJobStatus,
        limit: i64,
    ) -> SchedulerResult<Vec<JobStatusView>> {
        let jobs = self.job_repo.find_by_status(status, limit).await?;
        Ok(jobs.iter().map(JobStatusView::from).collect())
    }

    /// 某个导入任务的冲突记录, 按写入顺序
    pub async fn mismatches(&self, job_id: Uuid) -> SchedulerResult<Vec<ImportMismatch>> {
        self.mismatch_repo.find_by_job_id(job_id).await
    }

    pub async fn scheduled_event(&self, id: Uuid) -> SchedulerResult<ScheduledEvent> {
        self.event_repo
            .find_by_id(id)
            .await?
            .ok_or(SchedulerError::ScheduledEventNotFound { id })
    }

    pub async fn event_stats(&self) -> SchedulerResult<ScheduledEventStats> {
        self.event_repo.stats(Utc::now()).await
    }
}
