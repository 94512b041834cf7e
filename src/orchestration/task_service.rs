//! # Task Service
//!
//! Public task API: creation, lookup, listing, cancel, retry, batch creation,
//! queue status, statistics, and the two maintenance operations.
//!
//! Caller errors (`ValidationError`, `NotFound`, `InvalidState`) are returned
//! before anything is written. Maintenance operations never fail; their
//! results carry an error count instead.

use super::retention_service::{CleanupResult, RetentionService};
use super::staleness_detector::{StalenessDetector, TimeoutSweepResult};
use super::state_manager::StateManager;
use super::status_broadcaster::StatusBroadcaster;
use super::task_executor::RunningTasks;
use crate::config::SchedulerConfig;
use crate::constants::{limits, maintenance::CLEANUP_CHUNK_SIZE};
use crate::error::{PressroomError, PressroomResult};
use crate::models::{
    BatchCreateResult, BatchTaskFailure, NewTask, Pagination, QueueStatus, Task, TaskFilter,
    TaskPage, TaskSort, TaskStatistics,
};
use crate::registry::TaskHandlerRegistry;
use crate::state_machine::TaskState;
use crate::store::TaskStore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub struct TaskService {
    config: SchedulerConfig,
    registry: Arc<TaskHandlerRegistry>,
    state_manager: Arc<StateManager>,
    running: Arc<RunningTasks>,
    staleness: Arc<StalenessDetector>,
    retention: Arc<RetentionService>,
    wake: Arc<Notify>,
}

impl TaskService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<TaskHandlerRegistry>,
        state_manager: Arc<StateManager>,
        running: Arc<RunningTasks>,
        staleness: Arc<StalenessDetector>,
        retention: Arc<RetentionService>,
        wake: Arc<Notify>,
    ) -> Self {
        Self {
            config,
            registry,
            state_manager,
            running,
            staleness,
            retention,
            wake,
        }
    }

    fn store(&self) -> &Arc<dyn TaskStore> {
        self.state_manager.store()
    }

    pub fn broadcaster(&self) -> &Arc<StatusBroadcaster> {
        self.state_manager.broadcaster()
    }

    pub fn registry(&self) -> &Arc<TaskHandlerRegistry> {
        &self.registry
    }

    fn validate(&self, new_task: &NewTask) -> PressroomResult<()> {
        if new_task.task_type.trim().is_empty() {
            return Err(PressroomError::ValidationError(
                "task_type must not be empty".to_string(),
            ));
        }
        if !self.registry.is_registered(&new_task.task_type) {
            return Err(PressroomError::ValidationError(format!(
                "no handler registered for task type '{}'",
                new_task.task_type
            )));
        }
        if new_task.timeout_ms == Some(0) {
            return Err(PressroomError::ValidationError(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Validate and enqueue a task in `QUEUED`
    #[instrument(skip(self, new_task), fields(task_type = %new_task.task_type, priority = %new_task.priority))]
    pub async fn create_task(&self, new_task: NewTask) -> PressroomResult<Task> {
        self.validate(&new_task)?;

        let estimated_cost = self
            .registry
            .get(&new_task.task_type)
            .map(|handler| handler.estimate_cost(&new_task.input_data))
            .unwrap_or(0.0);

        let task = Task::from_new(
            new_task,
            self.config.default_timeout_ms,
            self.config.default_max_retries,
            estimated_cost,
            Utc::now(),
        );
        let created = self.store().insert(task).await?;

        info!(task_id = %created.id, "Task created");
        self.state_manager.record_created(&created);
        self.wake.notify_one();
        Ok(created)
    }

    pub async fn get_task(&self, id: Uuid) -> PressroomResult<Task> {
        self.store()
            .find_by_id(id)
            .await?
            .ok_or_else(|| PressroomError::not_found("task", id))
    }

    /// Newest first; `limit` is clamped to the maximum page size
    pub async fn list_tasks(&self, filter: TaskFilter, page: Pagination) -> PressroomResult<TaskPage> {
        let page = Pagination::new(page.limit.clamp(1, limits::MAX_PAGE_SIZE), page.offset);
        let tasks = self
            .store()
            .find_many(&filter, TaskSort::CreatedDesc, page)
            .await?;
        let total_count = self.store().count(&filter).await?;
        Ok(TaskPage { tasks, total_count })
    }

    /// Cancel a queued or processing task; a running handler gets its token fired
    pub async fn cancel_task(&self, id: Uuid) -> PressroomResult<Task> {
        let cancelled = self.state_manager.cancel(id).await?;
        if self.running.cancel(id) {
            info!(task_id = %id, "Signalled running handler to stop");
        }
        Ok(cancelled)
    }

    /// Requeue a failed or timed-out task immediately, consuming one retry
    pub async fn retry_task(&self, id: Uuid) -> PressroomResult<Task> {
        let retried = self.state_manager.retry(id).await?;
        self.wake.notify_one();
        Ok(retried)
    }

    /// Create tasks independently; one bad item never aborts the rest
    #[instrument(skip(self, new_tasks), fields(count = new_tasks.len()))]
    pub async fn create_tasks_batch(&self, new_tasks: Vec<NewTask>) -> PressroomResult<BatchCreateResult> {
        if new_tasks.is_empty() {
            return Err(PressroomError::ValidationError(
                "batch must contain at least one task".to_string(),
            ));
        }
        if new_tasks.len() > self.config.max_batch_size {
            return Err(PressroomError::ValidationError(format!(
                "batch of {} exceeds the maximum of {}",
                new_tasks.len(),
                self.config.max_batch_size
            )));
        }

        let mut result = BatchCreateResult::default();
        for (index, new_task) in new_tasks.into_iter().enumerate() {
            let task_type = new_task.task_type.clone();
            match self.create_task(new_task).await {
                Ok(task) => result.created.push(task),
                Err(e) => {
                    warn!(index, task_type = %task_type, error = %e, "Batch item rejected");
                    result.failed.push(BatchTaskFailure {
                        index,
                        task_type,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(result)
    }

    pub async fn get_queue_status(&self) -> PressroomResult<QueueStatus> {
        self.broadcaster().queue_status().await
    }

    /// Aggregates over every task matching `filter`
    pub async fn get_task_statistics(&self, filter: TaskFilter) -> PressroomResult<TaskStatistics> {
        let mut stats = TaskStatistics::default();
        let mut by_type: BTreeMap<String, u64> = BTreeMap::new();
        let mut processing_sum = 0i64;
        let mut processing_count = 0u64;
        let mut quality_sum = 0.0;
        let mut quality_count = 0u64;
        let mut offset = 0;

        loop {
            let chunk = self
                .store()
                .find_many(
                    &filter,
                    TaskSort::CreatedAsc,
                    Pagination::new(CLEANUP_CHUNK_SIZE, offset),
                )
                .await?;
            let fetched = chunk.len();

            for task in &chunk {
                stats.total_tasks += 1;
                *by_type.entry(task.task_type.clone()).or_default() += 1;
                match task.status {
                    TaskState::Completed => stats.completed_tasks += 1,
                    TaskState::Failed | TaskState::Timeout => stats.failed_tasks += 1,
                    TaskState::Cancelled => stats.cancelled_tasks += 1,
                    TaskState::Queued | TaskState::Processing => {}
                }
                stats.total_cost += task.actual_cost.unwrap_or(0.0);
                if let Some(ms) = task.processing_time_ms() {
                    processing_sum += ms;
                    processing_count += 1;
                }
                if let Some(score) = task.quality_score {
                    quality_sum += score;
                    quality_count += 1;
                }
            }

            if fetched < CLEANUP_CHUNK_SIZE {
                break;
            }
            offset += fetched;
        }

        let finished = stats.completed_tasks + stats.failed_tasks;
        stats.success_rate = if finished == 0 {
            0.0
        } else {
            stats.completed_tasks as f64 / finished as f64
        };
        stats.average_processing_ms =
            (processing_count > 0).then(|| processing_sum as f64 / processing_count as f64);
        stats.average_quality = (quality_count > 0).then(|| quality_sum / quality_count as f64);
        stats.by_type = by_type;
        Ok(stats)
    }

    pub async fn cleanup_old_tasks(&self) -> CleanupResult {
        self.retention.cleanup_old_tasks().await
    }

    pub async fn timeout_stale_tasks(&self, timeout_override_ms: Option<u64>) -> TimeoutSweepResult {
        self.staleness.timeout_stale_tasks(timeout_override_ms).await
    }
}
