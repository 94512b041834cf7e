//! # Status Broadcaster
//!
//! Publishes task status changes synchronously after each store write, and the
//! aggregate [`QueueStatus`] on a fixed timer whether or not counts changed.
//!
//! ## Configuration
//!
//! ```toml
//! [broadcast]
//! queue_status_interval_ms = 5000
//! channel_capacity = 1000
//! ```

use super::queue_status::QueueStatusCalculator;
use crate::config::BroadcastConfig;
use crate::error::PressroomResult;
use crate::events::{EventPublisher, EventSubscription, SubscriptionFilter, SystemEvent};
use crate::models::{QueueStatus, Task};
use crate::state_machine::TaskState;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct StatusBroadcaster {
    publisher: EventPublisher,
    calculator: QueueStatusCalculator,
    config: BroadcastConfig,
}

impl StatusBroadcaster {
    pub fn new(
        publisher: EventPublisher,
        calculator: QueueStatusCalculator,
        config: BroadcastConfig,
    ) -> Self {
        Self {
            publisher,
            calculator,
            config,
        }
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn subscribe(&self, filter: SubscriptionFilter) -> EventSubscription {
        self.publisher.subscribe(filter)
    }

    /// Fan out a task's new status. Never blocks on subscribers.
    pub fn on_task_status_changed(&self, from: Option<TaskState>, task: &Task) {
        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            from = ?from,
            to = %task.status,
            retry_count = task.retry_count,
            "Task status changed"
        );
        self.publisher.publish(SystemEvent::TaskStatusChanged {
            task_id: task.id,
            task_type: task.task_type.clone(),
            from,
            to: task.status,
            retry_count: task.retry_count,
            stage_ref: task.stage_ref,
            at: Utc::now(),
        });
    }

    pub async fn queue_status(&self) -> PressroomResult<QueueStatus> {
        self.calculator.compute().await
    }

    /// Compute the queue aggregate and broadcast it unconditionally
    pub async fn publish_queue_status(&self) -> PressroomResult<QueueStatus> {
        let status = self.calculator.compute().await?;
        if status.queue_health.is_degraded() {
            warn!(
                health = ?status.queue_health,
                queued = status.queued_tasks,
                failure_ratio = status.failure_ratio,
                "Queue health degraded"
            );
        }
        self.publisher
            .publish(SystemEvent::QueueStatusUpdated(status.clone()));
        Ok(status)
    }

    /// Timer loop; store errors are logged and the next tick retries.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.queue_status_interval_ms));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_ms = self.config.queue_status_interval_ms,
            "Queue status broadcaster started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.publish_queue_status().await {
                        warn!(error = %e, "Queue status broadcast failed; retrying next interval");
                    }
                }
            }
        }

        info!("Queue status broadcaster stopped");
    }
}
