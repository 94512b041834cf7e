//! # Data Models
//!
//! Records shared by the store, scheduler, broadcaster and pipeline orchestrator.
//!
//! - [`Task`]: one unit of asynchronous work and its query types
//! - [`Pipeline`]: a staged composition of tasks for one content item
//! - [`QueueStatus`]: derived aggregate snapshot of the queue

pub mod pipeline;
pub mod queue_status;
pub mod task;

pub use pipeline::{
    BatchFailure, BatchOperationResult, Pipeline, PipelineMetrics, PipelineStage, PipelineStatus,
    ReviewDecision, StageName, StageStatus, Urgency,
};
pub use queue_status::{QueueHealth, QueueStatus, TaskStatistics};
pub use task::{
    BatchCreateResult, BatchTaskFailure, NewTask, Pagination, StageRef, Task, TaskFilter,
    TaskPage, TaskPriority, TaskSort, TaskUpdate, UpdateCondition,
};
