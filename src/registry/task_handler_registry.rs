//! # Task Handler Registry
//!
//! Concurrent type-tag → handler map.
//!
//! ## Usage
//!
//! ```rust
//! use pressroom_core::registry::{HandlerOutput, TaskHandler, TaskHandlerRegistry};
//! use pressroom_core::error::PressroomResult;
//! use async_trait::async_trait;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! struct Translate;
//!
//! #[async_trait]
//! impl TaskHandler for Translate {
//!     async fn execute(&self, input: Value, _cancel: CancellationToken) -> PressroomResult<HandlerOutput> {
//!         Ok(HandlerOutput::new(json!({ "translated": input })).with_cost(0.02))
//!     }
//! }
//!
//! let registry = TaskHandlerRegistry::new();
//! registry.register("translate", Arc::new(Translate));
//! assert!(registry.is_registered("translate"));
//! ```

use crate::error::{PressroomError, PressroomResult};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result reported by a handler on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerOutput {
    pub output: Value,
    pub cost: f64,
    pub quality_score: Option<f64>,
}

impl HandlerOutput {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            cost: 0.0,
            quality_score: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_quality(mut self, quality_score: f64) -> Self {
        self.quality_score = Some(quality_score);
        self
    }

    /// Reject malformed results: negative or non-finite cost, quality outside 0–1.
    pub fn validate(&self) -> PressroomResult<()> {
        if !self.cost.is_finite() || self.cost < 0.0 {
            return Err(PressroomError::HandlerExecution(format!(
                "handler reported invalid cost {}",
                self.cost
            )));
        }
        if let Some(score) = self.quality_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(PressroomError::HandlerExecution(format!(
                    "handler reported quality score {score} outside 0..=1"
                )));
            }
        }
        Ok(())
    }
}

/// Executes one task type.
///
/// Implementations must poll `cancel` during long external calls; the
/// scheduler never aborts a handler on cancellation, it only stops waiting
/// once the task's timeout elapses.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, input: Value, cancel: CancellationToken)
        -> PressroomResult<HandlerOutput>;

    /// Cost estimate recorded on the task at creation
    fn estimate_cost(&self, _input: &Value) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryStats {
    pub total_handlers: usize,
    pub task_types: Vec<String>,
}

#[derive(Default)]
pub struct TaskHandlerRegistry {
    handlers: DashMap<String, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for TaskHandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandlerRegistry")
            .field("task_types", &self.registered_types())
            .finish()
    }
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the handler for `task_type`
    pub fn register(&self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) {
        let task_type = task_type.into();
        if self.handlers.insert(task_type.clone(), handler).is_some() {
            info!(task_type = %task_type, "Replaced task handler");
        } else {
            debug!(task_type = %task_type, "Registered task handler");
        }
    }

    pub fn unregister(&self, task_type: &str) -> bool {
        self.handlers.remove(task_type).is_some()
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_registered(&self, task_type: &str) -> bool {
        self.handlers.contains_key(task_type)
    }

    pub fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn stats(&self) -> RegistryStats {
        let task_types = self.registered_types();
        RegistryStats {
            total_handlers: task_types.len(),
            task_types,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        async fn execute(
            &self,
            input: Value,
            _cancel: CancellationToken,
        ) -> PressroomResult<HandlerOutput> {
            Ok(HandlerOutput::new(input))
        }

        fn estimate_cost(&self, _input: &Value) -> f64 {
            0.5
        }
    }

    #[tokio::test]
    async fn registered_handler_is_resolvable() {
        let registry = TaskHandlerRegistry::new();
        registry.register("echo", Arc::new(Echo));

        let handler = registry.get("echo").expect("handler");
        let output = handler
            .execute(json!({"a": 1}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.output, json!({"a": 1}));
        assert_eq!(handler.estimate_cost(&json!({})), 0.5);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn stats_list_sorted_types() {
        let registry = TaskHandlerRegistry::new();
        registry.register("translate", Arc::new(Echo));
        registry.register("generate", Arc::new(Echo));

        let stats = registry.stats();
        assert_eq!(stats.total_handlers, 2);
        assert_eq!(stats.task_types, vec!["generate", "translate"]);
        assert!(registry.unregister("generate"));
        assert!(!registry.is_registered("generate"));
    }

    #[test]
    fn validation_rejects_out_of_range_quality() {
        assert!(HandlerOutput::new(json!(null)).with_quality(0.9).validate().is_ok());
        assert!(HandlerOutput::new(json!(null)).with_quality(1.2).validate().is_err());
        assert!(HandlerOutput::new(json!(null))
            .with_quality(f64::NAN)
            .validate()
            .is_err());
        assert!(HandlerOutput::new(json!(null)).with_cost(-1.0).validate().is_err());
    }
}
