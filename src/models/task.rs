//! # Task Model
//!
//! A task is one schedulable, retryable unit of asynchronous work: an AI
//! generation call, a translation, an image render, an SEO pass, a publish.
//!
//! ## Overview
//!
//! Tasks are created in `QUEUED`, claimed by the scheduler, run by the handler
//! registered for their `task_type`, and finish as `COMPLETED`, `FAILED`,
//! `TIMEOUT` (retry pending) or `CANCELLED`. The store never sees a partial
//! task: every write goes through [`TaskUpdate`] so the same field rules apply
//! in memory and in PostgreSQL.
//!
//! ## Query Types
//!
//! - [`TaskFilter`]: the predicate shared by `find_many` and `count`
//! - [`TaskSort`]: dispatch order (priority desc, then FIFO) or recency
//! - [`Pagination`]: limit/offset window for listings
//!
//! ## Invariants
//!
//! - `retry_count <= max_retries`
//! - finished statuses carry `completed_at`
//! - only `QUEUED` tasks whose `scheduled_at` has passed are eligible for dispatch

use crate::constants::limits;
use crate::error::PressroomError;
use crate::state_machine::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use uuid::Uuid;

/// Dispatch priority. Declaration order is rank order, so `Urgent` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    /// Numeric rank persisted in the store (1 = low, 4 = urgent)
    pub fn rank(&self) -> i16 {
        match self {
            Self::Low => 1,
            Self::Normal => 2,
            Self::High => 3,
            Self::Urgent => 4,
        }
    }

    pub fn from_rank(rank: i16) -> Option<Self> {
        match rank {
            1 => Some(Self::Low),
            2 => Some(Self::Normal),
            3 => Some(Self::High),
            4 => Some(Self::Urgent),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Urgent => "URGENT",
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskPriority {
    type Err = PressroomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            "URGENT" => Ok(Self::Urgent),
            _ => Err(PressroomError::ValidationError(format!(
                "priority must be one of URGENT, HIGH, NORMAL, LOW (got {s})"
            ))),
        }
    }
}

/// Back-reference from a task to the pipeline stage it executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageRef {
    pub pipeline_id: Uuid,
    pub stage: crate::models::StageName,
}

/// A unit of asynchronous work tracked by the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: String,
    pub input_data: Value,
    pub output_data: Option<Value>,
    pub status: TaskState,
    pub priority: TaskPriority,
    pub estimated_cost: f64,
    pub actual_cost: Option<f64>,
    pub quality_score: Option<f64>,
    pub error_message: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Set while a failed or timed-out task waits out its backoff
    pub next_retry_at: Option<DateTime<Utc>>,
    pub timeout_ms: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub stage_ref: Option<StageRef>,
}

impl Task {
    /// Build a queued task from a creation request, filling in defaults.
    pub fn from_new(
        new_task: NewTask,
        default_timeout_ms: u64,
        default_max_retries: u32,
        estimated_cost: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: new_task.task_type,
            input_data: new_task.input_data,
            output_data: None,
            status: TaskState::Queued,
            priority: new_task.priority,
            estimated_cost,
            actual_cost: None,
            quality_score: None,
            error_message: None,
            retry_count: 0,
            max_retries: new_task.max_retries.unwrap_or(default_max_retries),
            scheduled_at: new_task.scheduled_at,
            next_retry_at: None,
            timeout_ms: new_task.timeout_ms.unwrap_or(default_timeout_ms),
            created_at: now,
            started_at: None,
            completed_at: None,
            stage_ref: new_task.stage_ref,
        }
    }

    /// Eligible for dispatch at `now`
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status == TaskState::Queued && self.scheduled_at.map_or(true, |at| at <= now)
    }

    pub fn has_retries_remaining(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Time spent waiting in the queue before the latest claim
    pub fn wait_time_ms(&self) -> Option<i64> {
        self.started_at
            .map(|started| (started - self.created_at).num_milliseconds().max(0))
    }

    pub fn processing_time_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => {
                Some((completed - started).num_milliseconds().max(0))
            }
            _ => None,
        }
    }

    /// Processing for longer than `timeout_ms` at `now`
    pub fn is_stale(&self, now: DateTime<Utc>, timeout_ms: u64) -> bool {
        self.status == TaskState::Processing
            && self.started_at.is_some_and(|started| {
                (now - started).num_milliseconds() > timeout_ms.min(i64::MAX as u64) as i64
            })
    }
}

/// Creation request for a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub task_type: String,
    pub input_data: Value,
    #[serde(default)]
    pub priority: TaskPriority,
    pub max_retries: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stage_ref: Option<StageRef>,
}

impl NewTask {
    pub fn new(task_type: impl Into<String>, input_data: Value) -> Self {
        Self {
            task_type: task_type.into(),
            input_data,
            priority: TaskPriority::Normal,
            max_retries: None,
            timeout_ms: None,
            scheduled_at: None,
            stage_ref: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn scheduled_at(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(at);
        self
    }

    pub fn for_stage(mut self, stage_ref: StageRef) -> Self {
        self.stage_ref = Some(stage_ref);
        self
    }
}

/// Partial update applied by the store.
///
/// `None` leaves a field untouched; `Some(None)` clears a nullable field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskState>,
    pub output_data: Option<Option<Value>>,
    pub actual_cost: Option<Option<f64>>,
    pub quality_score: Option<Option<f64>>,
    pub error_message: Option<Option<String>>,
    pub retry_count: Option<u32>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
}

impl TaskUpdate {
    pub fn apply(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(output) = &self.output_data {
            task.output_data = output.clone();
        }
        if let Some(cost) = self.actual_cost {
            task.actual_cost = cost;
        }
        if let Some(score) = self.quality_score {
            task.quality_score = score;
        }
        if let Some(message) = &self.error_message {
            task.error_message = message.clone();
        }
        if let Some(retry_count) = self.retry_count {
            task.retry_count = retry_count;
        }
        if let Some(at) = self.next_retry_at {
            task.next_retry_at = at;
        }
        if let Some(at) = self.started_at {
            task.started_at = at;
        }
        if let Some(at) = self.completed_at {
            task.completed_at = at;
        }
    }
}

/// Precondition for a conditional update: the write only lands if the stored
/// task still matches.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateCondition {
    pub statuses: Vec<TaskState>,
    pub retry_count: Option<u32>,
}

impl UpdateCondition {
    pub fn status_in(statuses: &[TaskState]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            retry_count: None,
        }
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn admits(&self, task: &Task) -> bool {
        self.statuses.contains(&task.status)
            && self.retry_count.map_or(true, |count| count == task.retry_count)
    }
}

/// Predicate used by `find_many` and `count`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskFilter {
    pub statuses: Option<Vec<TaskState>>,
    pub task_type: Option<String>,
    pub priority: Option<TaskPriority>,
    pub pipeline_id: Option<Uuid>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub completed_after: Option<DateTime<Utc>>,
    pub completed_before: Option<DateTime<Utc>>,
    /// Only tasks whose backoff has elapsed at this instant
    pub retry_due_at: Option<DateTime<Utc>>,
    /// Exclude tasks still waiting on a backoff requeue
    #[serde(default)]
    pub exclude_pending_retry: bool,
}

impl TaskFilter {
    pub fn with_statuses(statuses: &[TaskState]) -> Self {
        Self {
            statuses: Some(statuses.to_vec()),
            ..Default::default()
        }
    }

    pub fn with_status(status: TaskState) -> Self {
        Self::with_statuses(&[status])
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(statuses) = &self.statuses {
            if !statuses.contains(&task.status) {
                return false;
            }
        }
        if let Some(task_type) = &self.task_type {
            if &task.task_type != task_type {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        if let Some(pipeline_id) = self.pipeline_id {
            if task.stage_ref.map(|r| r.pipeline_id) != Some(pipeline_id) {
                return false;
            }
        }
        if self.created_after.is_some_and(|after| task.created_at <= after) {
            return false;
        }
        if self.created_before.is_some_and(|before| task.created_at >= before) {
            return false;
        }
        if let Some(after) = self.completed_after {
            if !task.completed_at.is_some_and(|at| at > after) {
                return false;
            }
        }
        if let Some(before) = self.completed_before {
            if !task.completed_at.is_some_and(|at| at < before) {
                return false;
            }
        }
        if let Some(due) = self.retry_due_at {
            if !task.next_retry_at.is_some_and(|at| at <= due) {
                return false;
            }
        }
        if self.exclude_pending_retry && task.next_retry_at.is_some() {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSort {
    /// Dispatch order: priority descending, then oldest first
    #[default]
    PriorityThenCreated,
    CreatedAsc,
    CreatedDesc,
}

impl TaskSort {
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        match self {
            Self::PriorityThenCreated => b
                .priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id)),
            Self::CreatedAsc => a.created_at.cmp(&b.created_at),
            Self::CreatedDesc => b.created_at.cmp(&a.created_at),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: usize,
    pub offset: usize,
}

impl Pagination {
    pub fn new(limit: usize, offset: usize) -> Self {
        Self { limit, offset }
    }

    pub fn first(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: limits::DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// One page of a task listing plus the unpaginated total
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTaskFailure {
    pub index: usize,
    pub task_type: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchCreateResult {
    pub created: Vec<Task>,
    pub failed: Vec<BatchTaskFailure>,
}
