//! # State Manager
//!
//! The only writer of task status. Each transition is validated against the
//! state machine, persisted with a conditional update, and broadcast once the
//! write lands. A conditional update that no longer matches means another
//! writer won (a cancel racing a completion, two requeues racing); the loser
//! gets `None` and leaves the task alone.

use super::backoff_calculator::BackoffCalculator;
use super::status_broadcaster::StatusBroadcaster;
use crate::error::{PressroomError, PressroomResult};
use crate::models::{Task, TaskUpdate, UpdateCondition};
use crate::registry::HandlerOutput;
use crate::state_machine::{TaskEvent, TaskState, TaskStateMachine};
use crate::store::TaskStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

pub struct StateManager {
    store: Arc<dyn TaskStore>,
    broadcaster: Arc<StatusBroadcaster>,
    backoff: BackoffCalculator,
}

fn requeue_update(task: &Task) -> TaskUpdate {
    TaskUpdate {
        status: Some(TaskState::Queued),
        retry_count: Some(task.retry_count + 1),
        output_data: Some(None),
        next_retry_at: Some(None),
        started_at: Some(None),
        completed_at: Some(None),
        ..Default::default()
    }
}

impl StateManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        broadcaster: Arc<StatusBroadcaster>,
        backoff: BackoffCalculator,
    ) -> Self {
        Self {
            store,
            broadcaster,
            backoff,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        &self.broadcaster
    }

    /// Announce a freshly inserted task
    pub fn record_created(&self, task: &Task) {
        self.broadcaster.on_task_status_changed(None, task);
    }

    /// Announce a task the store just claimed
    pub fn record_claimed(&self, task: &Task) {
        self.broadcaster
            .on_task_status_changed(Some(TaskState::Queued), task);
    }

    /// `PROCESSING → COMPLETED` with the handler's output
    #[instrument(skip(self, task, output), fields(task_id = %task.id))]
    pub async fn complete(&self, task: &Task, output: HandlerOutput) -> PressroomResult<Option<Task>> {
        let target = TaskStateMachine::transition(task, &TaskEvent::Complete)?;
        let update = TaskUpdate {
            status: Some(target),
            output_data: Some(Some(output.output)),
            actual_cost: Some(Some(output.cost)),
            quality_score: Some(output.quality_score),
            error_message: Some(None),
            next_retry_at: Some(None),
            completed_at: Some(Some(Utc::now())),
            ..Default::default()
        };

        let written = self
            .store
            .update_if(
                task.id,
                &UpdateCondition::status_in(&[TaskState::Processing]),
                &update,
            )
            .await?;

        match &written {
            Some(updated) => {
                info!(
                    task_type = %updated.task_type,
                    cost = output.cost,
                    quality_score = ?updated.quality_score,
                    "Task completed"
                );
                self.broadcaster
                    .on_task_status_changed(Some(TaskState::Processing), updated);
            }
            None => debug!("Task left PROCESSING before completion was recorded; result discarded"),
        }
        Ok(written)
    }

    /// `PROCESSING → FAILED | TIMEOUT`, scheduling a backoff requeue while
    /// retries remain. A timeout with no retries left lands in `FAILED`.
    #[instrument(skip(self, task, error), fields(task_id = %task.id, timed_out))]
    pub async fn fail(
        &self,
        task: &Task,
        error: String,
        timed_out: bool,
    ) -> PressroomResult<Option<Task>> {
        let event = if timed_out {
            TaskEvent::TimedOut(error.clone())
        } else {
            TaskEvent::Fail(error.clone())
        };
        let target = TaskStateMachine::transition(task, &event)?;

        let now = Utc::now();
        let next_retry_at = task
            .has_retries_remaining()
            .then(|| self.backoff.next_retry_at(task.retry_count, now));

        let update = TaskUpdate {
            status: Some(target),
            output_data: Some(None),
            error_message: Some(Some(error.clone())),
            next_retry_at: Some(next_retry_at),
            completed_at: Some(Some(now)),
            ..Default::default()
        };

        let written = self
            .store
            .update_if(
                task.id,
                &UpdateCondition::status_in(&[TaskState::Processing]),
                &update,
            )
            .await?;

        match &written {
            Some(updated) => {
                match next_retry_at {
                    Some(at) => warn!(
                        status = %updated.status,
                        retry_count = updated.retry_count,
                        max_retries = updated.max_retries,
                        next_retry_at = %at,
                        error = %error,
                        "Task failed; retry scheduled"
                    ),
                    None => warn!(
                        retry_count = updated.retry_count,
                        error = %error,
                        "Task failed permanently; retries exhausted"
                    ),
                }
                self.broadcaster
                    .on_task_status_changed(Some(TaskState::Processing), updated);
            }
            None => debug!("Task left PROCESSING before failure was recorded"),
        }
        Ok(written)
    }

    /// `FAILED | TIMEOUT → QUEUED` once the backoff has elapsed
    #[instrument(skip(self, task), fields(task_id = %task.id, retry_count = task.retry_count))]
    pub async fn requeue(&self, task: &Task) -> PressroomResult<Option<Task>> {
        TaskStateMachine::transition(task, &TaskEvent::Requeue)?;

        let condition = UpdateCondition::status_in(&[task.status]).with_retry_count(task.retry_count);
        let written = self
            .store
            .update_if(task.id, &condition, &requeue_update(task))
            .await?;

        if let Some(updated) = &written {
            info!(retry_count = updated.retry_count, "Task requeued after backoff");
            self.broadcaster
                .on_task_status_changed(Some(task.status), updated);
        }
        Ok(written)
    }

    /// Caller-initiated cancel from `QUEUED` or `PROCESSING`
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> PressroomResult<Task> {
        let task = self.load(id).await?;
        if TaskStateMachine::transition(&task, &TaskEvent::Cancel).is_err() {
            return Err(PressroomError::invalid_state("task", id, task.status, "cancel"));
        }

        let update = TaskUpdate {
            status: Some(TaskState::Cancelled),
            error_message: Some(Some("cancelled by request".to_string())),
            next_retry_at: Some(None),
            completed_at: Some(Some(Utc::now())),
            ..Default::default()
        };
        let condition = UpdateCondition::status_in(&[TaskState::Queued, TaskState::Processing]);

        match self.store.update_if(id, &condition, &update).await? {
            Some(updated) => {
                info!(from = %task.status, "Task cancelled");
                self.broadcaster
                    .on_task_status_changed(Some(task.status), &updated);
                Ok(updated)
            }
            None => {
                let current = self.load(id).await?;
                Err(PressroomError::invalid_state("task", id, current.status, "cancel"))
            }
        }
    }

    /// Caller-initiated immediate retry of a failed or timed-out task
    #[instrument(skip(self))]
    pub async fn retry(&self, id: Uuid) -> PressroomResult<Task> {
        let task = self.load(id).await?;
        if TaskStateMachine::transition(&task, &TaskEvent::Retry).is_err() {
            return Err(PressroomError::invalid_state("task", id, task.status, "retry"));
        }

        let condition = UpdateCondition::status_in(&[task.status]).with_retry_count(task.retry_count);
        match self
            .store
            .update_if(id, &condition, &requeue_update(&task))
            .await?
        {
            Some(updated) => {
                info!(retry_count = updated.retry_count, "Task retried by request");
                self.broadcaster
                    .on_task_status_changed(Some(task.status), &updated);
                Ok(updated)
            }
            None => {
                let current = self.load(id).await?;
                Err(PressroomError::invalid_state("task", id, current.status, "retry"))
            }
        }
    }

    async fn load(&self, id: Uuid) -> PressroomResult<Task> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| PressroomError::not_found("task", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackoffConfig, BroadcastConfig};
    use crate::events::{EventPublisher, SubscriptionFilter, SystemEvent};
    use crate::models::NewTask;
    use crate::orchestration::queue_status::QueueStatusCalculator;
    use crate::store::InMemoryTaskStore;
    use serde_json::json;

    fn manager() -> (Arc<InMemoryTaskStore>, StateManager) {
        let store = Arc::new(InMemoryTaskStore::new());
        let config = BroadcastConfig::default();
        let broadcaster = Arc::new(StatusBroadcaster::new(
            EventPublisher::new(64),
            QueueStatusCalculator::new(store.clone(), config.clone()),
            config,
        ));
        let manager = StateManager::new(
            store.clone(),
            broadcaster,
            BackoffCalculator::new(BackoffConfig::default()),
        );
        (store, manager)
    }

    async fn processing_task(store: &InMemoryTaskStore, max_retries: u32) -> Task {
        let task = Task::from_new(
            NewTask::new("generate", json!({})).with_max_retries(max_retries),
            1_000,
            3,
            0.0,
            Utc::now(),
        );
        store.insert(task).await.unwrap();
        store.claim_ready(1, Utc::now()).await.unwrap().remove(0)
    }

    #[tokio::test]
    async fn failure_with_budget_schedules_retry() {
        let (store, manager) = manager();
        let task = processing_task(&store, 2).await;

        let failed = manager
            .fail(&task, "boom".into(), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, TaskState::Failed);
        assert!(failed.next_retry_at.is_some());
        assert!(failed.completed_at.is_some());
        assert!(!TaskStateMachine::is_terminal(&failed));
    }

    #[tokio::test]
    async fn failure_without_budget_is_terminal() {
        let (store, manager) = manager();
        let task = processing_task(&store, 0).await;

        let failed = manager
            .fail(&task, "timed out".into(), true)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, TaskState::Failed);
        assert_eq!(failed.next_retry_at, None);
        assert!(TaskStateMachine::is_terminal(&failed));
    }

    #[tokio::test]
    async fn requeue_increments_retry_count_once() {
        let (store, manager) = manager();
        let task = processing_task(&store, 2).await;
        let failed = manager.fail(&task, "boom".into(), false).await.unwrap().unwrap();

        let requeued = manager.requeue(&failed).await.unwrap().unwrap();
        assert_eq!(requeued.status, TaskState::Queued);
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(requeued.started_at, None);

        // Second requeue from the same stale snapshot loses the condition.
        assert!(manager.requeue(&failed).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completion_after_cancel_is_discarded() {
        let (store, manager) = manager();
        let task = processing_task(&store, 1).await;

        manager.cancel(task.id).await.unwrap();
        let result = manager
            .complete(&task, HandlerOutput::new(json!("late")))
            .await
            .unwrap();
        assert!(result.is_none());

        let stored = store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskState::Cancelled);
        assert_eq!(stored.output_data, None);
    }

    #[tokio::test]
    async fn cancel_completed_task_is_invalid_state() {
        let (store, manager) = manager();
        let task = processing_task(&store, 1).await;
        let done = manager
            .complete(&task, HandlerOutput::new(json!("ok")))
            .await
            .unwrap()
            .unwrap();

        let err = manager.cancel(done.id).await.unwrap_err();
        assert!(matches!(err, PressroomError::InvalidState { .. }));
        let stored = store.find_by_id(done.id).await.unwrap().unwrap();
        assert_eq!(stored, done);
    }

    #[tokio::test]
    async fn retry_rejected_once_budget_is_spent() {
        let (store, manager) = manager();
        let task = processing_task(&store, 0).await;
        manager.fail(&task, "boom".into(), false).await.unwrap();

        let err = manager.retry(task.id).await.unwrap_err();
        assert!(matches!(err, PressroomError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn transitions_are_broadcast() {
        let (store, manager) = manager();
        let mut sub = manager
            .broadcaster()
            .subscribe(SubscriptionFilter::All);
        let task = processing_task(&store, 1).await;
        manager.complete(&task, HandlerOutput::new(json!(1))).await.unwrap();

        match sub.recv().await {
            Some(SystemEvent::TaskStatusChanged { from, to, .. }) => {
                assert_eq!(from, Some(TaskState::Processing));
                assert_eq!(to, TaskState::Completed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
