//! # Staleness Detector
//!
//! Sweeps `PROCESSING` tasks that have run past their timeout and records them
//! as timed out, so a crashed worker or a handler that ignored its deadline
//! cannot hold a task forever. Timed-out tasks with retries left come back
//! through the normal backoff path; the rest end up `FAILED`.
//!
//! A sweep never returns an error. Per-task failures are counted in
//! [`TimeoutSweepResult::errors`] and the next sweep picks the task up again.

use super::state_manager::StateManager;
use super::task_executor::RunningTasks;
use crate::config::MaintenanceConfig;
use crate::constants::maintenance::CLEANUP_CHUNK_SIZE;
use crate::error::PressroomResult;
use crate::models::{Pagination, Task, TaskFilter, TaskSort};
use crate::state_machine::TaskState;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutSweepResult {
    pub timed_out_count: u64,
    pub errors: u32,
}

pub struct StalenessDetector {
    state_manager: Arc<StateManager>,
    running: Arc<RunningTasks>,
    config: MaintenanceConfig,
}

impl StalenessDetector {
    pub fn new(
        state_manager: Arc<StateManager>,
        running: Arc<RunningTasks>,
        config: MaintenanceConfig,
    ) -> Self {
        Self {
            state_manager,
            running,
            config,
        }
    }

    /// Time out every task processing for longer than its own `timeout_ms`,
    /// or longer than `timeout_override_ms` when given.
    #[instrument(skip(self))]
    pub async fn timeout_stale_tasks(&self, timeout_override_ms: Option<u64>) -> TimeoutSweepResult {
        let mut result = TimeoutSweepResult::default();

        let stale = match self.find_stale(timeout_override_ms).await {
            Ok(stale) => stale,
            Err(e) => {
                warn!(error = %e, "Unable to scan for stale tasks");
                result.errors += 1;
                return result;
            }
        };

        for task in stale {
            let timeout_ms = timeout_override_ms.unwrap_or(task.timeout_ms);
            self.running.cancel(task.id);
            let message = format!("exceeded timeout of {timeout_ms}ms while processing");
            match self.state_manager.fail(&task, message, true).await {
                Ok(Some(_)) => result.timed_out_count += 1,
                Ok(None) => debug!(task_id = %task.id, "Task finished before it could be timed out"),
                Err(e) => {
                    warn!(task_id = %task.id, error = %e, "Failed to time out stale task");
                    result.errors += 1;
                }
            }
        }

        if result.timed_out_count > 0 || result.errors > 0 {
            info!(
                timed_out = result.timed_out_count,
                errors = result.errors,
                "Stale task sweep finished"
            );
        }
        result
    }

    async fn find_stale(&self, timeout_override_ms: Option<u64>) -> PressroomResult<Vec<Task>> {
        let store = self.state_manager.store();
        let filter = TaskFilter::with_status(TaskState::Processing);
        let now = Utc::now();
        let mut stale = Vec::new();
        let mut offset = 0;

        loop {
            let page = store
                .find_many(
                    &filter,
                    TaskSort::CreatedAsc,
                    Pagination::new(CLEANUP_CHUNK_SIZE, offset),
                )
                .await?;
            let fetched = page.len();
            stale.extend(
                page.into_iter()
                    .filter(|t| t.is_stale(now, timeout_override_ms.unwrap_or(t.timeout_ms))),
            );
            if fetched < CLEANUP_CHUNK_SIZE {
                break;
            }
            offset += fetched;
        }
        Ok(stale)
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let period = Duration::from_secs(self.config.stale_sweep_interval_secs);
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(interval_secs = self.config.stale_sweep_interval_secs, "Staleness detector started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let result = self.timeout_stale_tasks(None).await;
                    if result.errors > 0 {
                        error!(errors = result.errors, "Stale task sweep encountered errors");
                    }
                }
            }
        }
        info!("Staleness detector stopped");
    }
}
