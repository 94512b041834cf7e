//! # Retention Service
//!
//! Deletes finished tasks older than the retention window. Only terminal
//! tasks qualify: `COMPLETED`, `CANCELLED`, and `FAILED` tasks with no retry
//! pending. Deletion runs in chunks so one sweep never holds a large result
//! set, and a second sweep over the same window deletes nothing.

use super::state_manager::StateManager;
use crate::config::MaintenanceConfig;
use crate::constants::maintenance::CLEANUP_CHUNK_SIZE;
use crate::models::{Pagination, TaskFilter, TaskSort};
use crate::state_machine::TaskState;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub deleted_count: u64,
    pub errors: u32,
}

pub struct RetentionService {
    state_manager: Arc<StateManager>,
    config: MaintenanceConfig,
}

impl RetentionService {
    pub fn new(state_manager: Arc<StateManager>, config: MaintenanceConfig) -> Self {
        Self {
            state_manager,
            config,
        }
    }

    pub fn retention_days(&self) -> i64 {
        self.config.retention_days
    }

    #[instrument(skip(self), fields(retention_days = self.config.retention_days))]
    pub async fn cleanup_old_tasks(&self) -> CleanupResult {
        let store = self.state_manager.store();
        let cutoff = Utc::now() - ChronoDuration::days(self.config.retention_days);
        let filter = TaskFilter {
            completed_before: Some(cutoff),
            exclude_pending_retry: true,
            ..TaskFilter::with_statuses(&[
                TaskState::Completed,
                TaskState::Failed,
                TaskState::Cancelled,
            ])
        };

        let mut result = CleanupResult::default();
        loop {
            let chunk = match store
                .find_many(&filter, TaskSort::CreatedAsc, Pagination::first(CLEANUP_CHUNK_SIZE))
                .await
            {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(error = %e, "Unable to scan for expired tasks");
                    result.errors += 1;
                    break;
                }
            };

            let mut deleted_in_chunk = 0;
            for task in &chunk {
                match store.delete(task.id).await {
                    Ok(true) => deleted_in_chunk += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(task_id = %task.id, error = %e, "Failed to delete expired task");
                        result.errors += 1;
                    }
                }
            }
            result.deleted_count += deleted_in_chunk;

            // A chunk that deleted nothing would be returned again.
            if chunk.len() < CLEANUP_CHUNK_SIZE || deleted_in_chunk == 0 {
                break;
            }
        }

        if result.deleted_count > 0 || result.errors > 0 {
            info!(
                deleted = result.deleted_count,
                errors = result.errors,
                cutoff = %cutoff,
                "Retention cleanup finished"
            );
        }
        result
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.retention_interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.retention_interval_secs,
            retention_days = self.config.retention_days,
            "Retention service started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let result = self.cleanup_old_tasks().await;
                    if result.errors > 0 {
                        error!(errors = result.errors, "Retention cleanup encountered errors");
                    }
                }
            }
        }
        info!("Retention service stopped");
    }
}
