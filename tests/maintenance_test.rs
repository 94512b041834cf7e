//! Timeout sweeps, retention cleanup, and behavior while the store is down.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use pressroom_core::error::PressroomError;
use pressroom_core::models::{NewTask, Task, TaskFilter};
use pressroom_core::orchestration::OrchestrationCore;
use pressroom_core::registry::TaskHandlerRegistry;
use pressroom_core::state_machine::TaskState;
use pressroom_core::store::{InMemoryTaskStore, TaskStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn stored_task(status: TaskState, max_retries: u32) -> Task {
    let mut task = Task::from_new(
        NewTask::new("research", json!({})).with_max_retries(max_retries),
        1_000,
        3,
        0.0,
        Utc::now() - ChronoDuration::days(60),
    );
    task.status = status;
    task
}

fn core_over(store: Arc<dyn TaskStore>, registry: Arc<TaskHandlerRegistry>) -> OrchestrationCore {
    OrchestrationCore::builder(fast_config())
        .with_task_store(store)
        .with_registry(registry)
        .build()
        .unwrap()
}

#[tokio::test]
async fn sweep_times_out_tasks_stuck_in_processing() {
    let store = Arc::new(InMemoryTaskStore::new());
    let core = core_over(store.clone(), Arc::new(TaskHandlerRegistry::new()));

    let mut stuck_retryable = stored_task(TaskState::Processing, 2);
    stuck_retryable.started_at = Some(Utc::now() - ChronoDuration::seconds(10));
    let mut stuck_final = stored_task(TaskState::Processing, 0);
    stuck_final.started_at = Some(Utc::now() - ChronoDuration::seconds(10));
    let mut fresh = stored_task(TaskState::Processing, 2);
    fresh.started_at = Some(Utc::now());

    for task in [&stuck_retryable, &stuck_final, &fresh] {
        store.insert(task.clone()).await.unwrap();
    }

    let result = core.tasks().timeout_stale_tasks(None).await;
    assert_eq!(result.timed_out_count, 2);
    assert_eq!(result.errors, 0);

    let retryable = core.tasks().get_task(stuck_retryable.id).await.unwrap();
    assert_eq!(retryable.status, TaskState::Timeout);
    assert!(retryable.next_retry_at.is_some());

    let exhausted = core.tasks().get_task(stuck_final.id).await.unwrap();
    assert_eq!(exhausted.status, TaskState::Failed);
    assert!(exhausted.error_message.unwrap().contains("timeout"));

    let untouched = core.tasks().get_task(fresh.id).await.unwrap();
    assert_eq!(untouched.status, TaskState::Processing);

    // An override shorter than the fresh task's age sweeps it too
    tokio::time::sleep(Duration::from_millis(20)).await;
    let result = core.tasks().timeout_stale_tasks(Some(5)).await;
    assert_eq!(result.timed_out_count, 1);
}

#[tokio::test]
async fn handler_exceeding_its_budget_is_timed_out_by_the_executor() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    let blocking = Arc::new(BlockingHandler::default());
    registry.register("translate", blocking.clone());
    let core = core_with(fast_config(), registry);
    core.start();

    let task = core
        .tasks()
        .create_task(
            NewTask::new("translate", json!({}))
                .with_timeout_ms(40)
                .with_max_retries(0),
        )
        .await
        .unwrap();

    let tasks = Arc::clone(core.tasks());
    assert!(
        wait_until(Duration::from_secs(2), || {
            let tasks = Arc::clone(&tasks);
            async move { tasks.get_task(task.id).await.unwrap().status == TaskState::Failed }
        })
        .await
    );
    let failed = core.tasks().get_task(task.id).await.unwrap();
    assert!(failed.error_message.unwrap().contains("40ms"));
    assert_eq!(core.scheduler().running_count(), 0);

    core.shutdown().await;
}

#[tokio::test]
async fn retention_cleanup_is_idempotent_and_spares_live_work() {
    let store = Arc::new(InMemoryTaskStore::new());
    let core = core_over(store.clone(), Arc::new(TaskHandlerRegistry::new()));
    let old = Utc::now() - ChronoDuration::days(45);

    let mut expired = Vec::new();
    for status in [TaskState::Completed, TaskState::Cancelled, TaskState::Failed] {
        let mut task = stored_task(status, 0);
        task.completed_at = Some(old);
        expired.push(store.insert(task).await.unwrap().id);
    }

    let mut recent = stored_task(TaskState::Completed, 0);
    recent.completed_at = Some(Utc::now() - ChronoDuration::days(1));
    let mut waiting_retry = stored_task(TaskState::Failed, 3);
    waiting_retry.completed_at = Some(old);
    waiting_retry.next_retry_at = Some(Utc::now());
    let queued = stored_task(TaskState::Queued, 3);
    for task in [&recent, &waiting_retry, &queued] {
        store.insert(task.clone()).await.unwrap();
    }

    let first = core.tasks().cleanup_old_tasks().await;
    assert_eq!(first.deleted_count, 3);
    assert_eq!(first.errors, 0);

    let second = core.tasks().cleanup_old_tasks().await;
    assert_eq!(second.deleted_count, 0);

    for id in expired {
        let err = assert_err!(core.tasks().get_task(id).await);
        assert!(matches!(err, PressroomError::NotFound { .. }));
    }
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn loops_survive_a_store_outage_and_resume() {
    let store = Arc::new(FlakyTaskStore::default());
    let registry = Arc::new(TaskHandlerRegistry::new());
    registry.register("research", Arc::new(SucceedingHandler { quality: Some(0.9) }));
    let core = core_over(store.clone(), registry);

    let task = assert_ok!(
        core.tasks()
            .create_task(NewTask::new("research", json!({ "topic": "grid storage" })))
            .await
    );

    store.set_unavailable(true);
    core.start();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let err = assert_err!(
        core.tasks()
            .create_task(NewTask::new("research", json!({})))
            .await
    );
    assert!(err.is_transient());

    let sweep = core.tasks().timeout_stale_tasks(None).await;
    assert!(sweep.errors > 0);
    let cleanup = core.tasks().cleanup_old_tasks().await;
    assert!(cleanup.errors > 0);
    assert!(store.rejected_calls.load(std::sync::atomic::Ordering::SeqCst) > 3);
    assert!(core.is_running());

    store.set_unavailable(false);
    let tasks = Arc::clone(core.tasks());
    assert!(
        wait_until(Duration::from_secs(2), || {
            let tasks = Arc::clone(&tasks);
            async move {
                tasks
                    .get_task(task.id)
                    .await
                    .map(|t| t.status == TaskState::Completed)
                    .unwrap_or(false)
            }
        })
        .await
    );

    let stats = core
        .tasks()
        .get_task_statistics(TaskFilter::default())
        .await
        .unwrap();
    assert_eq!(stats.completed_tasks, 1);

    core.shutdown().await;
}
