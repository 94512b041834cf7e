#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Pressroom Core
//!
//! Async task queue and multi-stage content pipeline orchestration for the
//! Pressroom publishing platform.
//!
//! ## Overview
//!
//! Long-running AI work (research, drafting, translation, image generation,
//! SEO passes, publishing) runs as **tasks**: prioritized, retryable units
//! executed by registered handlers under a global concurrency ceiling. A
//! **pipeline** strings those tasks together for one content item, applying
//! the breaking-news fast path and the quality-gated auto-publish rule.
//!
//! ## Module Organization
//!
//! - [`models`] - tasks, pipelines, queue aggregates and their query types
//! - [`state_machine`] - task lifecycle states, events and transition rules
//! - [`store`] - `TaskStore` / `PipelineStore` seams with in-memory and PostgreSQL backends
//! - [`registry`] - task handler registration and the handler contract
//! - [`events`] - typed system events over a bounded broadcast bus
//! - [`orchestration`] - scheduler, executor, broadcaster, maintenance, task API, bootstrap
//! - [`pipeline`] - stage planning, the pipeline orchestrator, topic discovery, metrics
//! - [`config`] - layered configuration
//! - [`error`] - structured error handling
//! - [`logging`] - structured `tracing` setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pressroom_core::config::PressroomConfig;
//! use pressroom_core::models::{NewTask, TaskPriority};
//! use pressroom_core::orchestration::OrchestrationCore;
//! use serde_json::json;
//!
//! # async fn example() -> pressroom_core::error::PressroomResult<()> {
//! pressroom_core::logging::init_structured_logging();
//!
//! let core = OrchestrationCore::builder(PressroomConfig::load()?).build()?;
//! // core.registry().register("generate", Arc::new(MyGenerateHandler));
//! core.start();
//!
//! let task = core
//!     .tasks()
//!     .create_task(NewTask::new("generate", json!({"topic": "tides"})).with_priority(TaskPriority::High))
//!     .await?;
//! println!("queued {}", task.id);
//!
//! core.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod orchestration;
pub mod pipeline;
pub mod registry;
pub mod state_machine;
pub mod store;

pub use config::PressroomConfig;
pub use constants::TaskStatus;
pub use error::{PressroomError, PressroomResult};
pub use events::{EventPublisher, SubscriptionFilter, SystemEvent};
pub use models::{NewTask, Pipeline, Task, TaskPriority, Urgency};
pub use orchestration::{OrchestrationCore, TaskService};
pub use pipeline::{PipelineOrchestrator, PipelineRequest};
pub use registry::{HandlerOutput, TaskHandler, TaskHandlerRegistry};
