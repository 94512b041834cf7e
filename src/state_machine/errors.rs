use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateMachineError {
    #[error("Invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Retries exhausted ({retry_count}/{max_retries})")]
    RetriesExhausted { retry_count: u32, max_retries: u32 },
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
