//! # Persistence
//!
//! Storage seams for tasks and pipelines. The orchestration layer only talks
//! to [`TaskStore`] and [`PipelineStore`]; the in-memory implementations back
//! tests and single-process deployments, and the PostgreSQL implementations
//! (feature `postgres`) back durable ones.
//!
//! ## Atomicity
//!
//! Two operations must be atomic in every implementation:
//!
//! - [`TaskStore::claim_ready`]: `QUEUED → PROCESSING` for the top eligible
//!   tasks, so concurrent ticks never dispatch the same task twice
//! - [`TaskStore::update_if`]: a write that only lands while the stored task
//!   still satisfies an [`UpdateCondition`]

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use crate::error::PressroomResult;
use crate::models::{
    Pagination, Pipeline, Task, TaskFilter, TaskSort, TaskUpdate, UpdateCondition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use memory::{InMemoryPipelineStore, InMemoryTaskStore};
#[cfg(feature = "postgres")]
pub use postgres::{PgPipelineStore, PgTaskStore};

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: Task) -> PressroomResult<Task>;

    async fn find_by_id(&self, id: Uuid) -> PressroomResult<Option<Task>>;

    /// Unconditional partial update; `None` if the task does not exist.
    async fn update_fields(&self, id: Uuid, update: &TaskUpdate) -> PressroomResult<Option<Task>>;

    /// Conditional partial update; `None` if the task is missing or no longer
    /// satisfies `condition`.
    async fn update_if(
        &self,
        id: Uuid,
        condition: &UpdateCondition,
        update: &TaskUpdate,
    ) -> PressroomResult<Option<Task>>;

    async fn find_many(
        &self,
        filter: &TaskFilter,
        sort: TaskSort,
        page: Pagination,
    ) -> PressroomResult<Vec<Task>>;

    async fn count(&self, filter: &TaskFilter) -> PressroomResult<u64>;

    async fn delete(&self, id: Uuid) -> PressroomResult<bool>;

    /// Atomically claim up to `limit` ready tasks in dispatch order, marking
    /// them `PROCESSING` with `started_at = now`.
    async fn claim_ready(&self, limit: usize, now: DateTime<Utc>) -> PressroomResult<Vec<Task>>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn insert(&self, pipeline: Pipeline) -> PressroomResult<Pipeline>;

    async fn find_by_id(&self, id: Uuid) -> PressroomResult<Option<Pipeline>>;

    /// Replace the stored pipeline with `pipeline`.
    async fn save(&self, pipeline: &Pipeline) -> PressroomResult<()>;

    /// All pipelines, or only those with a non-terminal overall status.
    async fn list(&self, active_only: bool) -> PressroomResult<Vec<Pipeline>>;

    async fn count_active(&self) -> PressroomResult<usize>;
}
