//! # Queue Status Aggregation
//!
//! Read-only aggregate over the task store: per-status counts, rolling wait
//! and processing averages over recently finished tasks, and a health tier.
//!
//! Health is the worse of two classifications:
//!
//! - failure ratio `failed / (completed + failed)` against the warning and critical ratios
//! - backlog (`QUEUED` count) against the warning and critical depths

use crate::config::BroadcastConfig;
use crate::constants::broadcast as window;
use crate::error::PressroomResult;
use crate::models::{Pagination, QueueHealth, QueueStatus, TaskFilter, TaskSort};
use crate::state_machine::TaskState;
use crate::store::TaskStore;
use chrono::{Duration, Utc};
use std::sync::Arc;

pub fn classify_failure_ratio(ratio: f64, config: &BroadcastConfig) -> QueueHealth {
    if ratio >= config.failure_ratio_critical {
        QueueHealth::Critical
    } else if ratio >= config.failure_ratio_warning {
        QueueHealth::Warning
    } else {
        QueueHealth::Healthy
    }
}

pub fn classify_backlog(queued: u64, config: &BroadcastConfig) -> QueueHealth {
    if queued >= config.backlog_critical {
        QueueHealth::Critical
    } else if queued >= config.backlog_warning {
        QueueHealth::Warning
    } else {
        QueueHealth::Healthy
    }
}

pub fn classify_queue_health(ratio: f64, queued: u64, config: &BroadcastConfig) -> QueueHealth {
    classify_failure_ratio(ratio, config).max(classify_backlog(queued, config))
}

fn mean(values: impl Iterator<Item = i64>) -> Option<f64> {
    let (sum, count) = values.fold((0i64, 0u64), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum as f64 / count as f64)
}

#[derive(Clone)]
pub struct QueueStatusCalculator {
    store: Arc<dyn TaskStore>,
    config: BroadcastConfig,
}

impl QueueStatusCalculator {
    pub fn new(store: Arc<dyn TaskStore>, config: BroadcastConfig) -> Self {
        Self { store, config }
    }

    async fn count(&self, status: TaskState) -> PressroomResult<u64> {
        self.store.count(&TaskFilter::with_status(status)).await
    }

    pub async fn compute(&self) -> PressroomResult<QueueStatus> {
        let queued_tasks = self.count(TaskState::Queued).await?;
        let processing_tasks = self.count(TaskState::Processing).await?;
        let completed_tasks = self.count(TaskState::Completed).await?;
        let failed_tasks = self.count(TaskState::Failed).await?;
        let timed_out_tasks = self.count(TaskState::Timeout).await?;
        let cancelled_tasks = self.count(TaskState::Cancelled).await?;

        let now = Utc::now();
        let recent = self
            .store
            .find_many(
                &TaskFilter {
                    completed_after: Some(now - Duration::seconds(window::TIMING_WINDOW_SECS)),
                    ..TaskFilter::with_statuses(&[
                        TaskState::Completed,
                        TaskState::Failed,
                        TaskState::Timeout,
                    ])
                },
                TaskSort::CreatedDesc,
                Pagination::first(window::TIMING_SAMPLE_LIMIT),
            )
            .await?;

        let average_wait_ms = mean(recent.iter().filter_map(|t| t.wait_time_ms()));
        let average_processing_ms = mean(recent.iter().filter_map(|t| t.processing_time_ms()));

        let unsuccessful = failed_tasks + timed_out_tasks;
        let finished = completed_tasks + unsuccessful;
        let failure_ratio = if finished == 0 {
            0.0
        } else {
            unsuccessful as f64 / finished as f64
        };

        Ok(QueueStatus {
            queued_tasks,
            processing_tasks,
            completed_tasks,
            failed_tasks,
            timed_out_tasks,
            cancelled_tasks,
            average_wait_ms,
            average_processing_ms,
            failure_ratio,
            queue_health: classify_queue_health(failure_ratio, queued_tasks, &self.config),
            generated_at: now,
        })
    }
}
