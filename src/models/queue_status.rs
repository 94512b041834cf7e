//! Aggregate queue snapshot. Derived on demand, never persisted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Health classification derived from failure ratio and backlog size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueHealth {
    #[default]
    Healthy = 0,
    Warning = 1,
    Critical = 2,
}

impl PartialOrd for QueueHealth {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueHealth {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

impl QueueHealth {
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self, Self::Warning | Self::Critical)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub queued_tasks: u64,
    pub processing_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub timed_out_tasks: u64,
    pub cancelled_tasks: u64,
    /// Rolling mean of `started_at - created_at` over recently finished tasks
    pub average_wait_ms: Option<f64>,
    pub average_processing_ms: Option<f64>,
    pub failure_ratio: f64,
    pub queue_health: QueueHealth,
    pub generated_at: DateTime<Utc>,
}

/// Outcome statistics over a filtered set of tasks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total_tasks: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub cancelled_tasks: u64,
    /// completed / (completed + failed); zero when nothing has finished
    pub success_rate: f64,
    pub total_cost: f64,
    pub average_processing_ms: Option<f64>,
    pub average_quality: Option<f64>,
    pub by_type: BTreeMap<String, u64>,
}
