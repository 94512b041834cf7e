//! # Handler Registry
//!
//! Maps a task type tag to the handler that executes it. Handlers wrap the
//! external AI generation, translation, image and publishing services; the
//! scheduler only sees the [`TaskHandler`] contract.

pub mod task_handler_registry;

pub use task_handler_registry::{HandlerOutput, RegistryStats, TaskHandler, TaskHandlerRegistry};
