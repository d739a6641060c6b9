use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use epic_scheduler::{AppMode, SchedulerContext};
use scheduler_core::{AppConfig, SchedulerError, SchedulerResult};
use scheduler_domain::{
    FireHandler, ImportJobStatus, IssuePage, IssuePageRequest, LinearConnection, LinearIssue,
    LinearSource, LockTarget, NewLinearConnection,
};
use scheduler_infrastructure::DatabaseManager;

#[derive(Default)]
struct RecordingHandler {
    calls: Mutex<Vec<(i64, Value)>>,
}

impl RecordingHandler {
    fn calls(&self) -> Vec<(i64, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FireHandler for RecordingHandler {
    async fn fire(&self, user_id: i64, payload: &Value) -> SchedulerResult<()> {
        self.calls.lock().unwrap().push((user_id, payload.clone()));
        Ok(())
    }
}

/// 两页, 每页10个工作项, 第二页的第5个属于未映射的项目
struct TwoPageSource;

#[async_trait]
impl LinearSource for TwoPageSource {
    async fn fetch_issues(
        &self,
        _connection: &LinearConnection,
        request: &IssuePageRequest,
    ) -> SchedulerResult<IssuePage> {
        let page = match request.cursor.as_deref() {
            None => 0,
            Some("page-1") => 1,
            Some(other) => {
                return Err(SchedulerError::ExternalRejected(format!("bad cursor {other}")))
            }
        };
        let issues = (0..10)
            .map(|n| LinearIssue {
                id: format!("iss-{page}-{n}"),
                identifier: Some(format!("ENG-{}", page * 10 + n)),
                title: format!("Issue {page}-{n}"),
                description: None,
                priority: None,
                due_date: Some("2026-11-01".to_string()),
                state_type: Some("completed".to_string()),
                state_name: Some("Done".to_string()),
                assignee_email: None,
                project_id: Some(if page == 1 && n == 4 { "lp-other" } else { "lp-1" }.to_string()),
            })
            .collect();
        Ok(IssuePage {
            issues,
            next_cursor: (page == 0).then(|| "page-1".to_string()),
        })
    }
}

async fn context_with(handler: Arc<RecordingHandler>) -> Result<SchedulerContext> {
    let mut config = AppConfig::default();
    config.dispatcher.poll_interval_seconds = 1;
    config.importer.poll_interval_seconds = 1;

    let context = SchedulerContext::builder(config)
        .with_database(DatabaseManager::in_memory().await?)
        .with_fire_handler(handler)
        .with_linear_source(Arc::new(TwoPageSource))
        .build()
        .await?;
    Ok(context)
}

async fn active_connection(context: &SchedulerContext) -> Result<i64> {
    context
        .database()
        .workspace_directory_repository()
        .upsert_project(100, 7)
        .await?;
    let connection = context
        .database()
        .linear_connection_repository()
        .create(&NewLinearConnection {
            workspace_id: 7,
            user_id: 42,
            linear_org_id: "org_1".to_string(),
            linear_org_name: None,
            access_token: "lin_oauth_test".to_string(),
        })
        .await?;
    Ok(connection.id)
}

#[tokio::test]
async fn test_due_event_fires_once() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let context = context_with(handler.clone()).await?;

    let event = context
        .producer()
        .enqueue_scheduled_event(1, json!({"msg": "hi"}), Utc::now() - ChronoDuration::seconds(1))
        .await?;

    let report = context.dispatcher().run_cycle().await?;
    assert_eq!(report.fired, 1);

    let stored = context.observer().scheduled_event(event.id).await?;
    assert!(stored.processed);
    assert!(stored.lock_id.is_none());

    let calls = handler.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, 1);
    assert_eq!(calls[0].1["msg"], "hi");

    let stats = context.observer().event_stats().await?;
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.pending, 0);

    Ok(())
}

#[tokio::test]
async fn test_import_job_through_producer_and_observer() -> Result<()> {
    let context = context_with(Arc::new(RecordingHandler::default())).await?;
    let connection_id = active_connection(&context).await?;

    let job = context
        .producer()
        .enqueue_import_job(
            connection_id,
            7,
            42,
            json!({"importAll": true, "mappings": {"projects": {"lp-1": 100}}}),
        )
        .await?;
    assert_eq!(job.status, ImportJobStatus::Pending);

    context.runner().run_cycle().await?;

    let view = context.observer().job_status(job.id).await?;
    assert_eq!(view.status, ImportJobStatus::Succeeded);
    assert_eq!(view.retry_count, 0);
    assert!(view.last_error.is_none());
    assert_eq!(view.progress["version"], "v1");
    assert_eq!(view.progress["issues_imported"], 19);

    let mismatches = context.observer().mismatches(job.id).await?;
    assert_eq!(mismatches.len(), 1);
    assert_eq!(mismatches[0].mismatch_type, "unmapped_project");

    assert_eq!(
        context
            .database()
            .imported_issue_repository()
            .count_by_connection(connection_id)
            .await?,
        19
    );

    let succeeded = context
        .observer()
        .jobs_by_status(ImportJobStatus::Succeeded, 10)
        .await?;
    assert_eq!(succeeded.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_enqueue_import_job_validation() -> Result<()> {
    let context = context_with(Arc::new(RecordingHandler::default())).await?;
    let producer = context.producer();

    let missing = producer
        .enqueue_import_job(999, 7, 42, json!({"importAll": true}))
        .await;
    assert!(matches!(
        missing,
        Err(SchedulerError::ConnectionNotFound { id: 999 })
    ));

    let connection_id = active_connection(&context).await?;
    let invalid = producer
        .enqueue_import_job(connection_id, 7, 42, json!({"importAll": false}))
        .await;
    assert!(matches!(invalid, Err(SchedulerError::InvalidImportParams(_))));

    context
        .database()
        .linear_connection_repository()
        .revoke(connection_id, Utc::now())
        .await?;
    let revoked = producer
        .enqueue_import_job(connection_id, 7, 42, json!({"importAll": true}))
        .await;
    assert!(matches!(
        revoked,
        Err(SchedulerError::ConnectionInactive { .. })
    ));

    Ok(())
}

#[tokio::test]
async fn test_reschedule_and_cancel_events() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let context = context_with(handler.clone()).await?;
    let producer = context.producer();
    let past = Utc::now() - ChronoDuration::seconds(5);

    let postponed = producer
        .enqueue_scheduled_event(1, json!({"msg": "later"}), past)
        .await?;
    let cancelled = producer
        .enqueue_scheduled_event(2, json!({"msg": "never"}), past)
        .await?;

    producer
        .reschedule_event(
            postponed.id,
            Utc::now() + ChronoDuration::hours(1),
            Some(json!({"msg": "moved"})),
        )
        .await?;
    producer.cancel_scheduled_event(cancelled.id).await?;

    let report = context.dispatcher().run_cycle().await?;
    assert_eq!(report.selected, 0);
    assert!(handler.calls().is_empty());

    assert!(matches!(
        producer.cancel_scheduled_event(cancelled.id).await,
        Err(SchedulerError::ScheduledEventNotFound { .. })
    ));

    let fired = producer
        .enqueue_scheduled_event(3, json!({"msg": "now"}), past)
        .await?;
    context.dispatcher().run_cycle().await?;
    assert!(matches!(
        producer.cancel_scheduled_event(fired.id).await,
        Err(SchedulerError::ScheduledEventAlreadyProcessed { .. })
    ));
    assert!(matches!(
        producer.reschedule_event(fired.id, Utc::now(), None).await,
        Err(SchedulerError::ScheduledEventAlreadyProcessed { .. })
    ));

    let view = context.observer().scheduled_event(postponed.id).await?;
    assert_eq!(view.payload["msg"], "moved");
    assert!(!view.processed);

    Ok(())
}

#[tokio::test]
async fn test_event_being_fired_cannot_be_changed() -> Result<()> {
    let context = context_with(Arc::new(RecordingHandler::default())).await?;
    let producer = context.producer();
    let event = producer
        .enqueue_scheduled_event(1, json!({"msg": "hi"}), Utc::now())
        .await?;

    context
        .database()
        .lock_manager()
        .try_claim(
            LockTarget::ScheduledEvent,
            event.id,
            context.dispatcher().settings().lease_duration,
            Utc::now(),
        )
        .await?
        .expect("claim");

    assert!(matches!(
        producer
            .reschedule_event(event.id, Utc::now() + ChronoDuration::hours(1), None)
            .await,
        Err(SchedulerError::ScheduledEventClaimed { .. })
    ));
    assert!(matches!(
        producer.cancel_scheduled_event(event.id).await,
        Err(SchedulerError::ScheduledEventClaimed { .. })
    ));
    assert!(context.observer().scheduled_event(event.id).await.is_ok());

    Ok(())
}

#[tokio::test]
async fn test_start_and_stop_lifecycle() -> Result<()> {
    let handler = Arc::new(RecordingHandler::default());
    let context = context_with(handler.clone()).await?;
    let connection_id = active_connection(&context).await?;

    context
        .producer()
        .enqueue_scheduled_event(1, json!({"msg": "hi"}), Utc::now())
        .await?;
    let job = context
        .producer()
        .enqueue_import_job(
            connection_id,
            7,
            42,
            json!({"importAll": true, "mappings": {"projects": {"lp-1": 100}}}),
        )
        .await?;

    context.start(AppMode::All).await?;
    assert!(context.start(AppMode::All).await.is_err());

    let mut done = false;
    for _ in 0..50 {
        let status = context.observer().job_status(job.id).await?.status;
        if status == ImportJobStatus::Succeeded && handler.calls().len() == 1 {
            done = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(done, "background loops did not finish the work");

    assert!(context.stop(Duration::from_secs(5)).await);
    assert!(context.start(AppMode::All).await.is_err());
    assert_eq!(handler.calls().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_disabled_component_cannot_start_alone() -> Result<()> {
    let mut config = AppConfig::default();
    config.importer.enabled = false;
    let context = SchedulerContext::builder(config)
        .with_database(DatabaseManager::in_memory().await?)
        .with_fire_handler(Arc::new(RecordingHandler::default()))
        .build()
        .await?;

    assert!(context.start(AppMode::Importer).await.is_err());
    context.start(AppMode::Dispatcher).await?;
    assert!(context.stop(Duration::from_secs(5)).await);

    Ok(())
}

#[tokio::test]
async fn test_contexts_are_independent() -> Result<()> {
    let first_handler = Arc::new(RecordingHandler::default());
    let second_handler = Arc::new(RecordingHandler::default());
    let first = context_with(first_handler.clone()).await?;
    let second = context_with(second_handler.clone()).await?;

    first
        .producer()
        .enqueue_scheduled_event(1, json!({"msg": "first"}), Utc::now())
        .await?;

    second.dispatcher().run_cycle().await?;
    first.dispatcher().run_cycle().await?;

    assert!(second_handler.calls().is_empty());
    assert_eq!(first_handler.calls().len(), 1);
    assert_eq!(second.observer().event_stats().await?.processed, 0);

    Ok(())
}

#[test]
fn test_config_file_overrides_defaults() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("scheduler.toml");
    std::fs::write(
        &path,
        r#"
[dispatcher]
lease_seconds = 120
max_concurrent_fires = 2

[importer]
max_retries = 3
"#,
    )?;

    let config = AppConfig::load(path.to_str())?;
    assert_eq!(config.dispatcher.lease_seconds, 120);
    assert_eq!(config.dispatcher.max_concurrent_fires, 2);
    assert_eq!(config.importer.max_retries, 3);
    assert_eq!(config.importer.page_size, 50);

    Ok(())
}
