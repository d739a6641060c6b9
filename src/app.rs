use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use scheduler_core::AppConfig;
use scheduler_dispatcher::{
    DispatcherSettings, LoggingFireHandler, ScheduledEventDispatcher, WebhookFireHandler,
};
use scheduler_domain::{FireHandler, LinearSource};
use scheduler_importer::{ImportPipelineRunner, LinearGraphqlClient, RetryPolicy, RunnerSettings};
use scheduler_infrastructure::{DatabaseManager, MetricsCollector};

use crate::services::{JobObserver, ProducerService};
use crate::shutdown::{self, ShutdownManager};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行定时事件分发器
    Dispatcher,
    /// 仅运行导入运行器
    Importer,
    /// 运行所有已启用的组件
    All,
}

impl AppMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "dispatcher" => Some(AppMode::Dispatcher),
            "importer" => Some(AppMode::Importer),
            "all" => Some(AppMode::All),
            _ => None,
        }
    }
}

/// 构建调度上下文
///
/// 未指定的组件按配置创建: 数据库来自 `database.url`, 触发处理器在配置了
/// `dispatcher.webhook_url` 时使用webhook, 否则只记录日志。
pub struct SchedulerContextBuilder {
    config: AppConfig,
    database: Option<DatabaseManager>,
    fire_handler: Option<Arc<dyn FireHandler>>,
    linear_source: Option<Arc<dyn LinearSource>>,
}

impl SchedulerContextBuilder {
    pub fn with_database(mut self, database: DatabaseManager) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_fire_handler(mut self, handler: Arc<dyn FireHandler>) -> Self {
        self.fire_handler = Some(handler);
        self
    }

    pub fn with_linear_source(mut self, source: Arc<dyn LinearSource>) -> Self {
        self.linear_source = Some(source);
        self
    }

    pub async fn build(self) -> Result<SchedulerContext> {
        let config = self.config;

        let database = match self.database {
            Some(database) => database,
            None => DatabaseManager::from_config(&config.database)
                .await
                .with_context(|| {
                    format!("连接数据库失败: {}", mask_database_url(&config.database.url))
                })?,
        };
        let database = Arc::new(database);
        let metrics = Arc::new(MetricsCollector::new());

        let webhook_url = config.dispatcher.webhook_url.as_ref();
        let fire_handler: Arc<dyn FireHandler> = match (self.fire_handler, webhook_url) {
            (Some(handler), _) => handler,
            (None, Some(url)) => Arc::new(WebhookFireHandler::new(
                url.clone(),
                Duration::from_secs(config.dispatcher.webhook_timeout_seconds),
            )),
            (None, None) => Arc::new(LoggingFireHandler::new()),
        };
        let linear_source: Arc<dyn LinearSource> = match self.linear_source {
            Some(source) => source,
            None => Arc::new(LinearGraphqlClient::new(
                config.importer.linear_api_url.clone(),
                Duration::from_secs(config.importer.request_timeout_seconds),
            )),
        };

        let dispatcher = Arc::new(ScheduledEventDispatcher::new(
            database.scheduled_event_repository(),
            database.lock_manager(),
            fire_handler,
            Arc::clone(&metrics),
            DispatcherSettings::from(&config.dispatcher),
        ));
        let runner = Arc::new(ImportPipelineRunner::new(
            database.import_job_repository(),
            database.linear_connection_repository(),
            database.imported_issue_repository(),
            database.import_mismatch_repository(),
            database.workspace_directory_repository(),
            database.lock_manager(),
            linear_source,
            Arc::clone(&metrics),
            RetryPolicy::from(&config.importer),
            RunnerSettings::from(&config.importer),
        ));

        info!("调度上下文初始化完成, 数据库类型: {:?}", database.database_type());

        Ok(SchedulerContext {
            config,
            database,
            metrics,
            dispatcher,
            runner,
            shutdown: ShutdownManager::new(),
            handles: Mutex::new(Vec::new()),
        })
    }
}

/// 调度上下文
///
/// 持有数据库、分发器和导入运行器。每个实例相互独立, 测试可以在同一进程中创建多个。
pub struct SchedulerContext {
    config: AppConfig,
    database: Arc<DatabaseManager>,
    metrics: Arc<MetricsCollector>,
    dispatcher: Arc<ScheduledEventDispatcher>,
    runner: Arc<ImportPipelineRunner>,
    shutdown: ShutdownManager,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SchedulerContext {
    pub fn builder(config: AppConfig) -> SchedulerContextBuilder {
        SchedulerContextBuilder {
            config,
            database: None,
            fire_handler: None,
            linear_source: None,
        }
    }

    /// 启动轮询循环
    ///
    /// 单组件模式要求对应组件在配置中启用; `All` 模式只启动已启用的组件。
    pub async fn start(&self, mode: AppMode) -> Result<()> {
        if self.shutdown.is_shutdown().await {
            return Err(anyhow::anyhow!("调度上下文已停止, 不能再次启动"));
        }
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            return Err(anyhow::anyhow!("调度上下文已经启动"));
        }

        let (run_dispatcher, run_importer) = match mode {
            AppMode::Dispatcher => {
                if !self.config.dispatcher.enabled {
                    return Err(anyhow::anyhow!("Dispatcher被禁用，请检查配置"));
                }
                (true, false)
            }
            AppMode::Importer => {
                if !self.config.importer.enabled {
                    return Err(anyhow::anyhow!("Importer被禁用，请检查配置"));
                }
                (false, true)
            }
            AppMode::All => (self.config.dispatcher.enabled, self.config.importer.enabled),
        };

        if run_dispatcher {
            let dispatcher = Arc::clone(&self.dispatcher);
            let shutdown_rx = self.shutdown.subscribe().await;
            handles.push(tokio::spawn(async move {
                dispatcher.run(shutdown_rx).await;
            }));
        }
        if run_importer {
            let runner = Arc::clone(&self.runner);
            let shutdown_rx = self.shutdown.subscribe().await;
            handles.push(tokio::spawn(async move {
                runner.run(shutdown_rx).await;
            }));
        }

        if handles.is_empty() {
            warn!("没有启用任何组件");
        } else {
            info!("调度上下文已启动, 模式: {:?}, 组件数: {}", mode, handles.len());
        }
        Ok(())
    }

    /// 发送关闭信号并在宽限期内等待循环结束
    ///
    /// 循环在当前一轮结束后退出。超时被中止的步骤留下的租约过期后, 由下一次领取接管。
    pub async fn stop(&self, grace: Duration) -> bool {
        self.shutdown.shutdown().await;
        let handles = std::mem::take(&mut *self.handles.lock().await);
        let clean = shutdown::drain(handles, grace).await;
        if clean {
            info!("调度上下文已停止");
        }
        clean
    }

    pub fn producer(&self) -> ProducerService {
        ProducerService::new(
            self.database.scheduled_event_repository(),
            self.database.import_job_repository(),
            self.database.linear_connection_repository(),
            self.dispatcher.settings().lease_duration,
        )
    }

    pub fn observer(&self) -> JobObserver {
        JobObserver::new(
            self.database.scheduled_event_repository(),
            self.database.import_job_repository(),
            self.database.import_mismatch_repository(),
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &Arc<DatabaseManager> {
        &self.database
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn dispatcher(&self) -> &Arc<ScheduledEventDispatcher> {
        &self.dispatcher
    }

    pub fn runner(&self) -> &Arc<ImportPipelineRunner> {
        &self.runner
    }

    pub async fn shutdown_signal(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown.subscribe().await
    }
}

/// 屏蔽数据库URL中的密码
pub fn mask_database_url(url: &str) -> String {
    if let Some(at_pos) = url.find('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            // 只有用户名没有密码
            if url[colon_pos + 1..].starts_with("//") {
                return url.to_string();
            }
            let mut masked = url.to_string();
            masked.replace_range(colon_pos + 1..at_pos, "***");
            return masked;
        }
    }
    url.to_string()
}
