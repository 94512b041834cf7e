//! # System Constants
//!
//! Operational boundaries of the task queue and pipeline orchestrator. These are
//! the built-in defaults; deployments override them through `PressroomConfig`.

pub use crate::state_machine::TaskState as TaskStatus;

/// Event names carried on every broadcast payload
pub mod events {
    pub const TASK_STATUS_CHANGED: &str = "task.status_changed";
    pub const QUEUE_STATUS_UPDATED: &str = "queue.status_updated";
    pub const PIPELINE_ADVANCED: &str = "pipeline.advanced";
    pub const PIPELINE_METRICS_UPDATED: &str = "pipeline.metrics_updated";
}

/// Scheduler and execution limits
pub mod limits {
    pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 10;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
    /// One hour
    pub const DEFAULT_TASK_TIMEOUT_MS: u64 = 3_600_000;
    pub const DEFAULT_MAX_RETRIES: u32 = 3;
    pub const MAX_BATCH_SIZE: usize = 100;
    pub const DEFAULT_PAGE_SIZE: usize = 50;
    pub const MAX_PAGE_SIZE: usize = 1_000;
}

/// Backoff between retries
pub mod backoff {
    pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;
    pub const DEFAULT_MAX_DELAY_MS: u64 = 300_000;
    pub const DEFAULT_MULTIPLIER: f64 = 2.0;
    pub const DEFAULT_MAX_JITTER: f64 = 0.1;
}

/// Stale-task sweep and retention cleanup
pub mod maintenance {
    pub const DEFAULT_STALE_SWEEP_INTERVAL_SECS: u64 = 3_600;
    pub const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 3_600;
    pub const DEFAULT_RETENTION_DAYS: i64 = 7;
    pub const CLEANUP_CHUNK_SIZE: usize = 500;
}

/// Queue status broadcast and health thresholds
pub mod broadcast {
    pub const DEFAULT_QUEUE_STATUS_INTERVAL_MS: u64 = 5_000;
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_000;
    pub const FAILURE_RATIO_WARNING: f64 = 0.10;
    pub const FAILURE_RATIO_CRITICAL: f64 = 0.25;
    pub const BACKLOG_WARNING: u64 = 100;
    pub const BACKLOG_CRITICAL: u64 = 500;
    /// Window of finished tasks used for rolling wait and processing averages
    pub const TIMING_WINDOW_SECS: i64 = 3_600;
    pub const TIMING_SAMPLE_LIMIT: usize = 500;
}

/// Pipeline orchestration defaults
pub mod pipeline {
    pub const DEFAULT_MAX_CONCURRENT_PIPELINES: usize = 5;
    pub const DEFAULT_AUTO_PUBLISH_THRESHOLD: f64 = 0.85;
    /// Breaking news target: ten minutes end to end
    pub const BREAKING_NEWS_SLA_SECS: i64 = 600;
    pub const DEFAULT_RECONCILE_INTERVAL_MS: u64 = 5_000;
    pub const DEFAULT_MAX_REVISIONS: u32 = 3;
}
