use super::errors::{StateMachineError, StateMachineResult};
use crate::models::Task;

/// Precondition checked before a transition is written
pub trait StateGuard {
    fn check(&self, task: &Task) -> StateMachineResult<()>;

    fn description(&self) -> &'static str;
}

/// A failed or timed-out task may only go back on the queue while retries remain
pub struct RetryBudgetGuard;

impl StateGuard for RetryBudgetGuard {
    fn check(&self, task: &Task) -> StateMachineResult<()> {
        if task.retry_count < task.max_retries {
            Ok(())
        } else {
            Err(StateMachineError::RetriesExhausted {
                retry_count: task.retry_count,
                max_retries: task.max_retries,
            })
        }
    }

    fn description(&self) -> &'static str {
        "retry_count must be below max_retries"
    }
}
