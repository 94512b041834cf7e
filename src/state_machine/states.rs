use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle states of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting to be claimed by the scheduler
    Queued,
    /// Claimed and running in a handler
    Processing,
    /// Handler returned output
    Completed,
    /// Handler errored; may still be requeued while retries remain
    Failed,
    /// Handler exceeded its time budget; a retry is pending
    Timeout,
    /// Cancelled by an explicit request
    Cancelled,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        Self::Queued,
        Self::Processing,
        Self::Completed,
        Self::Failed,
        Self::Timeout,
        Self::Cancelled,
    ];

    /// States that carry a `completed_at` timestamp
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Timeout | Self::Cancelled
        )
    }

    /// States a caller may cancel from
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::Queued | Self::Processing)
    }

    /// States that may return to `Queued` while retries remain
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "QUEUED" => Ok(Self::Queued),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "TIMEOUT" => Ok(Self::Timeout),
            "CANCELLED" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid task state: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("processing".parse::<TaskState>(), Ok(TaskState::Processing));
        assert_eq!("TIMEOUT".parse::<TaskState>(), Ok(TaskState::Timeout));
        assert!("running".parse::<TaskState>().is_err());
    }

    #[test]
    fn serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&TaskState::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }

    #[test]
    fn only_queued_and_processing_are_cancellable() {
        let cancellable: Vec<_> = TaskState::ALL
            .iter()
            .filter(|s| s.is_cancellable())
            .collect();
        assert_eq!(cancellable, vec![&TaskState::Queued, &TaskState::Processing]);
    }
}
