use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::broadcast;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument};

use scheduler_core::{DispatcherConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    stale_before, CycleClock, FireHandler, LockManager, LockTarget, ScheduledEvent,
    ScheduledEventRepository,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

/// 分发器运行参数
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub poll_interval: Duration,
    /// 租约时长, 同时作为单次触发的超时时间
    pub lease_duration: Duration,
    pub batch_size: i64,
    pub max_concurrent_fires: usize,
    pub poison_retry_threshold: i32,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self::from(&DispatcherConfig::default())
    }
}

impl From<&DispatcherConfig> for DispatcherSettings {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_seconds),
            lease_duration: Duration::from_secs(config.lease_seconds),
            batch_size: config.batch_size,
            max_concurrent_fires: config.max_concurrent_fires.max(1),
            poison_retry_threshold: config.poison_retry_threshold,
        }
    }
}

/// 单轮分发的结果统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub selected: usize,
    pub fired: usize,
    pub failed: usize,
    /// 被其他实例抢先领取
    pub contended: usize,
    /// 写回时令牌已失效
    pub lost_locks: usize,
    /// 存储层错误, 事件留待下一轮
    pub errors: usize,
}

enum FireOutcome {
    Fired,
    Failed,
    Contended,
    LockLost,
}

/// 定时事件分发器
pub struct ScheduledEventDispatcher {
    event_repo: Arc<dyn ScheduledEventRepository>,
    lock_manager: Arc<dyn LockManager>,
    handler: Arc<dyn FireHandler>,
    metrics: Arc<MetricsCollector>,
    settings: DispatcherSettings,
}

impl ScheduledEventDispatcher {
    pub fn new(
        event_repo: Arc<dyn ScheduledEventRepository>,
        lock_manager: Arc<dyn LockManager>,
        handler: Arc<dyn FireHandler>,
        metrics: Arc<MetricsCollector>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            event_repo,
            lock_manager,
            handler,
            metrics,
            settings,
        }
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// 以当前时间执行一轮分发
    pub async fn run_cycle(&self) -> SchedulerResult<DispatchReport> {
        self.run_cycle_at(Utc::now()).await
    }

    /// 以指定时间执行一轮分发
    ///
    /// `now` 决定哪些事件到期, 每次领取和失败记录使用 `now` 加上本轮已流逝的时间。
    #[instrument(skip(self))]
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> SchedulerResult<DispatchReport> {
        let started = Instant::now();
        let clock = CycleClock::start(now);
        let candidates = self
            .event_repo
            .find_eligible(
                now,
                stale_before(now, self.settings.lease_duration),
                self.settings.batch_size,
            )
            .await?;

        let mut report = DispatchReport {
            selected: candidates.len(),
            ..Default::default()
        };
        self.metrics.update_due_events(candidates.len() as f64);

        if candidates.is_empty() {
            debug!("没有到期的定时事件");
            self.metrics
                .record_dispatch_cycle(started.elapsed().as_secs_f64());
            return Ok(report);
        }

        // buffered 保持候选顺序启动触发, 并发度受 max_concurrent_fires 限制
        let outcomes: Vec<(ScheduledEvent, SchedulerResult<FireOutcome>)> =
            stream::iter(candidates)
                .map(|event| async move {
                    let outcome = self.dispatch_event(&event, &clock).await;
                    (event, outcome)
                })
                .buffered(self.settings.max_concurrent_fires)
                .collect()
                .await;

        for (event, outcome) in outcomes {
            match outcome {
                Ok(FireOutcome::Fired) => report.fired += 1,
                Ok(FireOutcome::Failed) => report.failed += 1,
                Ok(FireOutcome::Contended) => report.contended += 1,
                Ok(FireOutcome::LockLost) => report.lost_locks += 1,
                Err(e) => {
                    error!("分发定时事件 {} 失败: {}", event.id, e);
                    StructuredLogger::log_system_error("dispatcher", "dispatch_event", &e);
                    report.errors += 1;
                }
            }
        }

        self.metrics
            .record_dispatch_cycle(started.elapsed().as_secs_f64());
        info!(
            "本轮分发完成: 选中 {}, 触发 {}, 失败 {}, 被抢占 {}, 锁丢失 {}",
            report.selected, report.fired, report.failed, report.contended, report.lost_locks
        );
        Ok(report)
    }

    async fn dispatch_event(
        &self,
        event: &ScheduledEvent,
        clock: &CycleClock,
    ) -> SchedulerResult<FireOutcome> {
        let target = LockTarget::ScheduledEvent;
        let lease = match self
            .lock_manager
            .try_claim(target, event.id, self.settings.lease_duration, clock.now())
            .await?
        {
            Some(lease) => lease,
            None => {
                self.metrics.record_claim_contention(target.table_name());
                StructuredLogger::log_claim_contended(target.table_name(), event.id);
                return Ok(FireOutcome::Contended);
            }
        };

        let fire_started = Instant::now();
        let fire_result = match timeout(
            self.settings.lease_duration,
            self.handler.fire(event.user_id, &event.payload),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::ExecutionTimeout),
        };
        let elapsed = fire_started.elapsed();

        match fire_result {
            Ok(()) => match self.event_repo.mark_processed(event.id, &lease.token).await {
                Ok(()) => {
                    self.metrics.record_event_fired(elapsed.as_secs_f64());
                    StructuredLogger::log_event_fired(
                        event.id,
                        event.user_id,
                        event.due_at,
                        elapsed.as_millis() as u64,
                    );
                    Ok(FireOutcome::Fired)
                }
                Err(e) if e.is_lost_lock() => {
                    self.on_lock_lost(event, "mark_processed");
                    Ok(FireOutcome::LockLost)
                }
                Err(e) => Err(e),
            },
            Err(fire_error) => {
                let reason = fire_error.to_string();
                match self
                    .event_repo
                    .record_failure(event.id, &lease.token, &reason, clock.now())
                    .await
                {
                    Ok(retry_count) => {
                        self.metrics
                            .record_event_fire_failure(elapsed.as_secs_f64());
                        StructuredLogger::log_event_fire_failed(
                            event.id,
                            retry_count,
                            self.settings.poison_retry_threshold,
                            &reason,
                        );
                        Ok(FireOutcome::Failed)
                    }
                    Err(e) if e.is_lost_lock() => {
                        self.on_lock_lost(event, "record_failure");
                        Ok(FireOutcome::LockLost)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn on_lock_lost(&self, event: &ScheduledEvent, operation: &str) {
        let target = LockTarget::ScheduledEvent.table_name();
        self.metrics.record_lost_lock(target);
        StructuredLogger::log_lock_lost(target, event.id, operation);
    }

    /// 按固定间隔循环分发, 直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        let mut poll_interval = interval(self.settings.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "定时事件分发器已启动, 轮询间隔 {:?}, 租约 {:?}",
            self.settings.poll_interval, self.settings.lease_duration
        );

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!("定时事件分发失败: {}", e);
                        StructuredLogger::log_system_error("dispatcher", "run_cycle", &e);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("定时事件分发器正在关闭");
                    break;
                }
            }
        }
    }
}
