use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEvent,
    guards::{RetryBudgetGuard, StateGuard},
    states::TaskState,
};
use crate::models::Task;

/// Transition rules for the task lifecycle.
///
/// Stateless: callers read the task, ask for the target state, then persist
/// it through a conditional store update so concurrent writers cannot both win.
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// Determine the target state based on current state and event
    pub fn determine_target_state(
        current_state: TaskState,
        event: &TaskEvent,
    ) -> StateMachineResult<TaskState> {
        let target = match (current_state, event) {
            (TaskState::Queued, TaskEvent::Claim) => TaskState::Processing,

            (TaskState::Processing, TaskEvent::Complete) => TaskState::Completed,
            (TaskState::Processing, TaskEvent::Fail(_)) => TaskState::Failed,
            (TaskState::Processing, TaskEvent::TimedOut(_)) => TaskState::Timeout,

            (TaskState::Failed | TaskState::Timeout, TaskEvent::Requeue) => TaskState::Queued,
            (TaskState::Failed | TaskState::Timeout, TaskEvent::Retry) => TaskState::Queued,

            (TaskState::Queued | TaskState::Processing, TaskEvent::Cancel) => TaskState::Cancelled,

            (from_state, _) => {
                return Err(StateMachineError::InvalidTransition {
                    from: from_state.to_string(),
                    event: event.event_type().to_string(),
                })
            }
        };

        Ok(target)
    }

    /// Resolve the target state for `task` and check guard conditions.
    ///
    /// A timeout on a task with no retries left lands in `Failed`, since
    /// `Timeout` always implies a pending requeue.
    pub fn transition(task: &Task, event: &TaskEvent) -> StateMachineResult<TaskState> {
        let target = Self::determine_target_state(task.status, event)?;

        match (target, event) {
            (TaskState::Queued, TaskEvent::Requeue | TaskEvent::Retry) => {
                RetryBudgetGuard.check(task)?;
                Ok(target)
            }
            (TaskState::Timeout, _) if RetryBudgetGuard.check(task).is_err() => {
                Ok(TaskState::Failed)
            }
            _ => Ok(target),
        }
    }

    /// No further transition is possible without a new task.
    pub fn is_terminal(task: &Task) -> bool {
        match task.status {
            TaskState::Completed | TaskState::Cancelled => true,
            TaskState::Failed => task.next_retry_at.is_none(),
            _ => false,
        }
    }
}
