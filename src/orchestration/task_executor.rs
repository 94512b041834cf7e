//! # Task Executor
//!
//! Runs one claimed task through its registered handler and records the
//! outcome through the [`StateManager`].
//!
//! ## Execution envelope
//!
//! ```text
//! claimed task → registry lookup → timeout(catch_unwind(handler.execute)) → record outcome
//! ```
//!
//! - no handler registered: the task fails without invoking anything
//! - handler error or invalid output: `FAILED` (retry scheduled if budget remains)
//! - handler panic: treated as a handler error, the executor itself survives
//! - deadline exceeded: the cancellation token fires and the task is recorded as
//!   timed out; cancellation is cooperative, so a handler that ignores its token
//!   may keep running but its late result is discarded
//!
//! When the store is unavailable while recording an outcome the task stays
//! `PROCESSING` and the staleness sweep reclaims it later.

use super::state_manager::StateManager;
use crate::error::PressroomError;
use crate::models::Task;
use crate::registry::TaskHandlerRegistry;
use dashmap::DashMap;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};
use uuid::Uuid;

/// Cancellation tokens of the handlers currently executing, keyed by task id
#[derive(Debug, Default)]
pub struct RunningTasks {
    tokens: DashMap<Uuid, CancellationToken>,
}

impl RunningTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(task_id, token.clone());
        token
    }

    pub fn remove(&self, task_id: Uuid) {
        self.tokens.remove(&task_id);
    }

    /// Signal the handler running `task_id`, if any. Returns whether one was running.
    pub fn cancel(&self, task_id: Uuid) -> bool {
        match self.tokens.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for entry in self.tokens.iter() {
            entry.value().cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// What became of one execution attempt
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Completed,
    Failed { error: String, retry_scheduled: bool },
    TimedOut { retry_scheduled: bool },
    /// The task changed state underneath the handler (cancelled, swept) or the
    /// outcome could not be recorded; nothing was written.
    Discarded,
}

pub struct TaskExecutor {
    registry: Arc<TaskHandlerRegistry>,
    state_manager: Arc<StateManager>,
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl TaskExecutor {
    pub fn new(registry: Arc<TaskHandlerRegistry>, state_manager: Arc<StateManager>) -> Self {
        Self {
            registry,
            state_manager,
        }
    }

    #[instrument(skip_all, fields(task_id = %task.id, task_type = %task.task_type, retry_count = task.retry_count))]
    pub async fn execute(&self, task: Task, cancel: CancellationToken) -> ExecutionOutcome {
        let Some(handler) = self.registry.get(&task.task_type) else {
            error!("No handler registered for task type");
            let message = format!("no handler registered for task type '{}'", task.task_type);
            return self.record_failure(&task, message, false).await;
        };

        let timeout_ms = task.timeout_ms;
        let start = Instant::now();
        let invocation =
            AssertUnwindSafe(handler.execute(task.input_data.clone(), cancel.clone())).catch_unwind();
        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), invocation).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(Ok(output))) => {
                if let Err(e) = output.validate() {
                    warn!(error = %e, "Handler returned invalid output");
                    return self.record_failure(&task, e.to_string(), false).await;
                }
                debug!(elapsed_ms, "Handler completed");
                match self.state_manager.complete(&task, output).await {
                    Ok(Some(_)) => ExecutionOutcome::Completed,
                    Ok(None) => ExecutionOutcome::Discarded,
                    Err(e) => {
                        error!(error = %e, "Failed to record completion; task left for staleness sweep");
                        ExecutionOutcome::Discarded
                    }
                }
            }
            Ok(Ok(Err(handler_error))) => {
                debug!(elapsed_ms, error = %handler_error, "Handler returned error");
                self.record_failure(&task, handler_error.to_string(), false)
                    .await
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                error!(elapsed_ms, panic_msg = %message, "Handler panicked");
                self.record_failure(&task, format!("handler panicked: {message}"), false)
                    .await
            }
            Err(_) => {
                cancel.cancel();
                warn!(timeout_ms, "Handler exceeded its timeout");
                let message = PressroomError::Timeout { timeout_ms }.to_string();
                self.record_failure(&task, message, true).await
            }
        }
    }

    async fn record_failure(&self, task: &Task, error: String, timed_out: bool) -> ExecutionOutcome {
        match self.state_manager.fail(task, error.clone(), timed_out).await {
            Ok(Some(updated)) => {
                let retry_scheduled = updated.next_retry_at.is_some();
                if timed_out {
                    ExecutionOutcome::TimedOut { retry_scheduled }
                } else {
                    ExecutionOutcome::Failed {
                        error,
                        retry_scheduled,
                    }
                }
            }
            Ok(None) => ExecutionOutcome::Discarded,
            Err(e) => {
                error!(error = %e, "Failed to record failure; task left for staleness sweep");
                ExecutionOutcome::Discarded
            }
        }
    }
}
