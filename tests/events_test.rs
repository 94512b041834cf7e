//! Status broadcasting as seen by subscribers.

mod common;

use common::*;
use pressroom_core::events::{SubscriptionFilter, SystemEvent};
use pressroom_core::models::{NewTask, QueueHealth, Urgency};
use pressroom_core::pipeline::PipelineRequest;
use pressroom_core::registry::TaskHandlerRegistry;
use pressroom_core::state_machine::TaskState;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn next_event(
    subscription: &mut pressroom_core::events::EventSubscription,
) -> SystemEvent {
    tokio::time::timeout(Duration::from_secs(2), subscription.recv())
        .await
        .expect("event within two seconds")
        .expect("channel open")
}

#[tokio::test]
async fn task_subscribers_see_every_transition_in_order() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    registry.register("research", Arc::new(SucceedingHandler { quality: Some(0.7) }));
    let core = core_with(fast_config(), registry);
    let mut all = core.publisher().subscribe(SubscriptionFilter::All);

    let task = core
        .tasks()
        .create_task(NewTask::new("research", json!({ "topic": "fusion" })))
        .await
        .unwrap();
    core.start();

    let mut transitions = Vec::new();
    while transitions.last().map(|(_, to)| *to) != Some(TaskState::Completed) {
        if let SystemEvent::TaskStatusChanged { task_id, from, to, .. } = next_event(&mut all).await {
            if task_id == task.id {
                transitions.push((from, to));
            }
        }
    }
    assert_eq!(
        transitions,
        vec![
            (None, TaskState::Queued),
            (Some(TaskState::Queued), TaskState::Processing),
            (Some(TaskState::Processing), TaskState::Completed),
        ]
    );

    core.shutdown().await;
}

#[tokio::test]
async fn filtered_subscriptions_only_receive_matching_events() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    registry.register("research", Arc::new(SucceedingHandler { quality: None }));
    register_pipeline_handlers(&registry, 0.9);
    let core = core_with(fast_config(), registry);

    let other = core
        .tasks()
        .create_task(NewTask::new("research", json!({})))
        .await
        .unwrap();
    let watched = core
        .tasks()
        .create_task(NewTask::new("research", json!({})))
        .await
        .unwrap();

    let mut one_task = core.publisher().subscribe(SubscriptionFilter::Task(watched.id));
    let mut queue = core.publisher().subscribe(SubscriptionFilter::QueueStatus);
    let mut stage_tasks = core.publisher().subscribe(SubscriptionFilter::StageTasks);
    core.start();

    match next_event(&mut one_task).await {
        SystemEvent::TaskStatusChanged { task_id, to, .. } => {
            assert_eq!(task_id, watched.id);
            assert_ne!(task_id, other.id);
            assert_eq!(to, TaskState::Processing);
        }
        event => panic!("unexpected event {}", event.event_name()),
    }

    // Ad-hoc tasks never reach the stage-task stream; pipeline tasks do
    let pipeline = core
        .pipelines()
        .initiate(PipelineRequest::new("coastal erosion", Urgency::High))
        .await
        .unwrap();
    match next_event(&mut stage_tasks).await {
        SystemEvent::TaskStatusChanged { stage_ref, .. } => {
            assert_eq!(stage_ref.unwrap().pipeline_id, pipeline.id);
        }
        event => panic!("unexpected event {}", event.event_name()),
    }

    match next_event(&mut queue).await {
        SystemEvent::QueueStatusUpdated(status) => {
            assert_eq!(status.queue_health, QueueHealth::Healthy);
        }
        event => panic!("unexpected event {}", event.event_name()),
    }

    core.shutdown().await;
}

#[tokio::test]
async fn pipeline_metrics_are_published_periodically() {
    let registry = Arc::new(TaskHandlerRegistry::new());
    register_pipeline_handlers(&registry, 0.95);
    let core = core_with(fast_config(), registry);
    let mut metrics = core.publisher().subscribe(SubscriptionFilter::PipelineMetrics);
    core.start();

    let pipeline = core
        .pipelines()
        .initiate(PipelineRequest::new("drought relief", Urgency::Medium).with_target_languages(vec![]))
        .await
        .unwrap();

    let pipelines = Arc::clone(core.pipelines());
    assert!(
        wait_until(Duration::from_secs(5), || {
            let pipelines = Arc::clone(&pipelines);
            async move { !pipelines.get(pipeline.id).await.unwrap().is_active() }
        })
        .await
    );

    let snapshot = loop {
        if let SystemEvent::PipelineMetricsUpdated(snapshot) = next_event(&mut metrics).await {
            if snapshot.completed_pipelines == 1 {
                break snapshot;
            }
        }
    };
    assert_eq!(snapshot.total_pipelines, 1);
    assert_eq!(snapshot.active_pipelines, 0);
    assert!((snapshot.auto_publish_rate - 1.0).abs() < f64::EPSILON);
    assert!(snapshot.average_completion_ms.is_some());

    core.shutdown().await;
}
