use serde::{Deserialize, Serialize};

/// Events that can trigger task state transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEvent {
    /// Scheduler claimed the task for execution
    Claim,
    /// Handler returned valid output
    Complete,
    /// Handler errored or returned malformed output
    Fail(String),
    /// Handler exceeded the task's time budget
    TimedOut(String),
    /// Backoff elapsed; put the task back on the queue
    Requeue,
    /// Caller requested an immediate retry
    Retry,
    /// Caller cancelled the task
    Cancel,
}

impl TaskEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Claim => "claim",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::TimedOut(_) => "timed_out",
            Self::Requeue => "requeue",
            Self::Retry => "retry",
            Self::Cancel => "cancel",
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Fail(msg) | Self::TimedOut(msg) => Some(msg),
            _ => None,
        }
    }
}
