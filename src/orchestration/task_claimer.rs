//! # Task Claimer
//!
//! Thin wrapper over [`TaskStore::claim_ready`] that bounds batch size and
//! announces every claim. The store does the atomic `QUEUED → PROCESSING`
//! flip (`FOR UPDATE SKIP LOCKED` in PostgreSQL, a single write lock in
//! memory), so concurrent claimers never receive the same task.

use super::state_manager::StateManager;
use crate::error::PressroomResult;
use crate::models::Task;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, instrument};

#[derive(Clone)]
pub struct TaskClaimer {
    state_manager: Arc<StateManager>,
    max_batch_size: usize,
}

impl TaskClaimer {
    pub fn new(state_manager: Arc<StateManager>, max_batch_size: usize) -> Self {
        Self {
            state_manager,
            max_batch_size: max_batch_size.max(1),
        }
    }

    /// Claim up to `limit` ready tasks, highest priority first, FIFO within a priority
    #[instrument(skip(self))]
    pub async fn claim_ready_tasks(
        &self,
        limit: usize,
        now: DateTime<Utc>,
    ) -> PressroomResult<Vec<Task>> {
        let limit = limit.min(self.max_batch_size);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let claimed = self.state_manager.store().claim_ready(limit, now).await?;
        if !claimed.is_empty() {
            debug!(requested = limit, claimed = claimed.len(), "Claimed ready tasks");
        }
        for task in &claimed {
            self.state_manager.record_claimed(task);
        }
        Ok(claimed)
    }
}
