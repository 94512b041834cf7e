//! Error types for the Pressroom task queue and pipeline orchestrator.
//!
//! Errors fall into two groups. Caller-facing errors (`ValidationError`,
//! `NotFound`, `InvalidState`, `CapacityExceeded`) are returned from API
//! operations before any state change. Execution errors (`HandlerExecution`,
//! `Timeout`, `StoreUnavailable`) are recorded on the affected task or logged
//! by the background loops and are never raised from read operations.

use crate::state_machine::StateMachineError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PressroomError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Cannot {operation} {entity} {id} while it is {status}")]
    InvalidState {
        entity: &'static str,
        id: String,
        status: String,
        operation: &'static str,
    },

    #[error("Capacity exceeded: {active} active pipelines (limit {limit})")]
    CapacityExceeded { active: usize, limit: usize },

    #[error("Handler execution error: {0}")]
    HandlerExecution(String),

    #[error("Handler timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),
}

impl PressroomError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(
        entity: &'static str,
        id: impl ToString,
        status: impl ToString,
        operation: &'static str,
    ) -> Self {
        Self::InvalidState {
            entity,
            id: id.to_string(),
            status: status.to_string(),
            operation,
        }
    }

    /// Transient infrastructure faults the background loops retry on their next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }
}

impl From<serde_json::Error> for PressroomError {
    fn from(error: serde_json::Error) -> Self {
        PressroomError::SerializationError(error.to_string())
    }
}

impl From<config::ConfigError> for PressroomError {
    fn from(error: config::ConfigError) -> Self {
        PressroomError::ConfigurationError(error.to_string())
    }
}

#[cfg(feature = "postgres")]
impl From<sqlx::Error> for PressroomError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => PressroomError::not_found("row", "unknown"),
            other => PressroomError::StoreUnavailable(other.to_string()),
        }
    }
}

pub type PressroomResult<T> = anyhow::Result<T, PressroomError>;
