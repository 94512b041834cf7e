//! End-to-end task queue behavior: claiming, ordering, retries, cancellation.

mod common;

use common::*;
use pressroom_core::error::PressroomError;
use pressroom_core::models::{NewTask, Pagination, TaskFilter, TaskPriority};
use pressroom_core::registry::TaskHandlerRegistry;
use pressroom_core::state_machine::TaskState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn failing_task_retries_with_growing_gaps_then_fails() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    let handler = Arc::new(FailingHandler::default());
    registry.register("generate", handler.clone());

    let core = core_with(fast_config(), registry);
    core.start();

    let task = core
        .tasks()
        .create_task(
            NewTask::new("generate", json!({ "topic": "tidal energy" }))
                .with_priority(TaskPriority::High)
                .with_max_retries(2)
                .with_timeout_ms(5_000),
        )
        .await
        .unwrap();

    let tasks = Arc::clone(core.tasks());
    let finished = wait_until(Duration::from_secs(5), || {
        let tasks = Arc::clone(&tasks);
        async move {
            let t = tasks.get_task(task.id).await.unwrap();
            t.status == TaskState::Failed && t.next_retry_at.is_none()
        }
    })
    .await;
    assert!(finished, "task never reached terminal FAILED");

    let final_task = core.tasks().get_task(task.id).await.unwrap();
    assert_eq!(final_task.retry_count, 2);
    assert!(final_task
        .error_message
        .as_deref()
        .unwrap()
        .contains("upstream model unavailable"));

    // No attempt beyond the retry budget
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(handler.calls(), 3);

    let attempts = handler.attempts.lock().clone();
    let first_gap = attempts[1] - attempts[0];
    let second_gap = attempts[2] - attempts[1];
    assert!(first_gap >= Duration::from_millis(30), "first gap {first_gap:?}");
    assert!(second_gap >= Duration::from_millis(60), "second gap {second_gap:?}");
    assert!(second_gap > first_gap);

    core.shutdown().await;
}

#[tokio::test]
async fn concurrent_ticks_never_dispatch_a_task_twice() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    let counter = Arc::new(parking_lot::Mutex::new(std::collections::HashMap::new()));

    struct CountingHandler(Arc<parking_lot::Mutex<std::collections::HashMap<String, u32>>>);

    #[async_trait::async_trait]
    impl pressroom_core::registry::TaskHandler for CountingHandler {
        async fn execute(
            &self,
            input: serde_json::Value,
            _cancel: tokio_util::sync::CancellationToken,
        ) -> pressroom_core::error::PressroomResult<pressroom_core::registry::HandlerOutput> {
            let key = input["n"].to_string();
            *self.0.lock().entry(key).or_insert(0) += 1;
            Ok(pressroom_core::registry::HandlerOutput::new(json!({})))
        }
    }

    registry.register("research", Arc::new(CountingHandler(Arc::clone(&counter))));
    let mut config = fast_config();
    config.scheduler.max_concurrent_tasks = 50;
    let core = core_with(config, registry);

    for n in 0..40 {
        assert_ok!(
            core.tasks()
                .create_task(NewTask::new("research", json!({ "n": n })))
                .await
        );
    }

    let ticks = (0..8).map(|_| {
        let scheduler = Arc::clone(core.scheduler());
        tokio::spawn(async move { scheduler.tick().await })
    });
    for tick in futures::future::join_all(ticks).await {
        assert_ok!(tick.unwrap());
    }

    let tasks = Arc::clone(core.tasks());
    assert!(
        wait_until(Duration::from_secs(2), || {
            let tasks = Arc::clone(&tasks);
            async move {
                tasks
                    .get_task_statistics(TaskFilter::default())
                    .await
                    .unwrap()
                    .completed_tasks
                    == 40
            }
        })
        .await
    );

    let counts = counter.lock();
    assert_eq!(counts.len(), 40);
    assert!(counts.values().all(|&c| c == 1));
}

#[tokio::test]
async fn urgent_work_is_dispatched_before_older_low_priority_work() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    struct OrderHandler(Arc<parking_lot::Mutex<Vec<String>>>);

    #[async_trait::async_trait]
    impl pressroom_core::registry::TaskHandler for OrderHandler {
        async fn execute(
            &self,
            input: serde_json::Value,
            _cancel: tokio_util::sync::CancellationToken,
        ) -> pressroom_core::error::PressroomResult<pressroom_core::registry::HandlerOutput> {
            self.0.lock().push(input["label"].as_str().unwrap_or_default().to_string());
            Ok(pressroom_core::registry::HandlerOutput::new(json!({})))
        }
    }

    registry.register("translate", Arc::new(OrderHandler(Arc::clone(&order))));
    let mut config = fast_config();
    config.scheduler.max_concurrent_tasks = 1;
    let core = core_with(config, registry);

    for (label, priority) in [
        ("low", TaskPriority::Low),
        ("normal", TaskPriority::Normal),
        ("urgent", TaskPriority::Urgent),
        ("high", TaskPriority::High),
    ] {
        core.tasks()
            .create_task(NewTask::new("translate", json!({ "label": label })).with_priority(priority))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    core.start();
    let observed = Arc::clone(&order);
    assert!(
        wait_until(Duration::from_secs(2), || {
            let observed = Arc::clone(&observed);
            async move { observed.lock().len() == 4 }
        })
        .await
    );
    core.shutdown().await;

    assert_eq!(*order.lock(), vec!["urgent", "high", "normal", "low"]);
}

#[tokio::test]
async fn cancellation_is_only_legal_before_a_terminal_state() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    let blocking = Arc::new(BlockingHandler::default());
    registry.register("generate_images", blocking.clone());
    registry.register("publish", Arc::new(SucceedingHandler { quality: None }));
    let core = core_with(fast_config(), registry);

    // Queued: cancellable without ever running
    let queued = core
        .tasks()
        .create_task(NewTask::new("generate_images", json!({})))
        .await
        .unwrap();
    let cancelled = assert_ok!(core.tasks().cancel_task(queued.id).await);
    assert_eq!(cancelled.status, TaskState::Cancelled);
    assert!(cancelled.completed_at.is_some());

    // Cancelling twice is an invalid-state error
    let err = assert_err!(core.tasks().cancel_task(queued.id).await);
    assert!(matches!(err, PressroomError::InvalidState { .. }));

    core.start();

    // Processing: the handler's token fires and the late result is discarded
    let running = core
        .tasks()
        .create_task(NewTask::new("generate_images", json!({})))
        .await
        .unwrap();
    let tasks = Arc::clone(core.tasks());
    assert!(
        wait_until(Duration::from_secs(2), || {
            let tasks = Arc::clone(&tasks);
            async move { tasks.get_task(running.id).await.unwrap().status == TaskState::Processing }
        })
        .await
    );
    assert_ok!(core.tasks().cancel_task(running.id).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    let after = core.tasks().get_task(running.id).await.unwrap();
    assert_eq!(after.status, TaskState::Cancelled);
    assert_eq!(core.scheduler().running_count(), 0);

    // Completed: not cancellable
    let done = core
        .tasks()
        .create_task(NewTask::new("publish", json!({})))
        .await
        .unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            let tasks = Arc::clone(&tasks);
            async move { tasks.get_task(done.id).await.unwrap().status == TaskState::Completed }
        })
        .await
    );
    let err = assert_err!(core.tasks().cancel_task(done.id).await);
    assert!(matches!(err, PressroomError::InvalidState { .. }));

    core.shutdown().await;
}

#[tokio::test]
async fn manual_retry_skips_the_backoff_but_not_the_budget() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    let handler = Arc::new(FailingHandler::default());
    registry.register("optimize_seo", handler.clone());
    let mut config = fast_config();
    config.backoff.base_delay_ms = 60_000;
    config.backoff.max_delay_ms = 60_000;
    let core = core_with(config, registry);
    core.start();

    let task = core
        .tasks()
        .create_task(NewTask::new("optimize_seo", json!({})).with_max_retries(1))
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
    assert!(core.tasks().get_task(task.id).await.unwrap().next_retry_at.is_some());

    let retried = assert_ok!(core.tasks().retry_task(task.id).await);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.status, TaskState::Queued);
    assert!(wait_until(Duration::from_secs(2), || async { handler.calls() == 2 }).await);

    assert!(
        wait_until(Duration::from_secs(2), || {
            let tasks = Arc::clone(&tasks);
            async move { tasks.get_task(task.id).await.unwrap().status == TaskState::Failed }
        })
        .await
    );
    assert_err!(core.tasks().retry_task(task.id).await);

    core.shutdown().await;
}

#[tokio::test]
async fn creation_is_validated_and_listing_is_newest_first() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    registry.register("research", Arc::new(SucceedingHandler { quality: None }));
    let core = core_with(fast_config(), registry);

    let err = assert_err!(
        core.tasks()
            .create_task(NewTask::new("unknown", json!({})))
            .await
    );
    assert!(matches!(err, PressroomError::ValidationError(_)));

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            core.tasks()
                .create_task(NewTask::new("research", json!({ "n": n })))
                .await
                .unwrap()
                .id,
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let page = core
        .tasks()
        .list_tasks(TaskFilter::with_status(TaskState::Queued), Pagination::new(2, 1))
        .await
        .unwrap();
    assert_eq!(page.total_count, 5);
    assert_eq!(
        page.tasks.iter().map(|t| t.id).collect::<Vec<_>>(),
        vec![ids[3], ids[2]]
    );

    let batch = core
        .tasks()
        .create_tasks_batch(vec![
            NewTask::new("research", json!({})),
            NewTask::new("nope", json!({})),
        ])
        .await
        .unwrap();
    assert_eq!(batch.created.len(), 1);
    assert_eq!(batch.failed.len(), 1);
    assert_eq!(batch.failed[0].index, 1);
}
