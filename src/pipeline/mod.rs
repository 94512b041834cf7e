//! # Content Pipelines
//!
//! Multi-stage content production built on the task queue: each stage runs as
//! one task, the orchestrator advances stages as their tasks finish, and the
//! auto-publish gate routes low-quality drafts to human review.

pub mod discovery;
pub mod metrics;
pub mod orchestrator;
pub mod stages;

pub use discovery::{DiscoveredTopic, StaticTopicSource, TopicDiscovery};
pub use metrics::compute_metrics;
pub use orchestrator::{PipelineOrchestrator, PipelineRequest};
