//! # Orchestration Engine
//!
//! Everything that moves tasks through their lifecycle.
//!
//! ## Core Components
//!
//! - **TaskScheduler**: poll loop that promotes due retries, claims ready tasks
//!   within the concurrency ceiling, and spawns executors
//! - **TaskExecutor**: runs one handler under a timeout with panic isolation
//! - **StateManager**: validated, conditional status writes plus broadcast
//! - **StatusBroadcaster**: task status fan-out and the periodic queue aggregate
//! - **StalenessDetector** / **RetentionService**: maintenance sweeps
//! - **TaskService**: the public task API
//! - **OrchestrationCore**: wires the above together with the pipeline
//!   orchestrator and owns the background loops

pub mod backoff_calculator;
pub mod core;
pub mod queue_status;
pub mod retention_service;
pub mod scheduler;
pub mod staleness_detector;
pub mod state_manager;
pub mod status_broadcaster;
pub mod task_claimer;
pub mod task_executor;
pub mod task_service;

pub use backoff_calculator::BackoffCalculator;
pub use self::core::{OrchestrationCore, OrchestrationCoreBuilder};
pub use queue_status::QueueStatusCalculator;
pub use retention_service::{CleanupResult, RetentionService};
pub use scheduler::{TaskScheduler, TickReport};
pub use staleness_detector::{StalenessDetector, TimeoutSweepResult};
pub use state_manager::StateManager;
pub use status_broadcaster::StatusBroadcaster;
pub use task_claimer::TaskClaimer;
pub use task_executor::{ExecutionOutcome, RunningTasks, TaskExecutor};
pub use task_service::TaskService;
