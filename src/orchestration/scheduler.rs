//! # Task Scheduler
//!
//! Periodic dispatch loop. Each tick:
//!
//! 1. promotes failed or timed-out tasks whose backoff has elapsed back to `QUEUED`
//! 2. reserves as many execution permits as are free
//! 3. claims that many ready tasks (priority descending, FIFO within a priority)
//! 4. spawns one executor per claimed task, holding its permit until the
//!    handler returns
//!
//! The semaphore is the concurrency ceiling: at most `max_concurrent_tasks`
//! handlers run at once, and nothing is claimed without a permit in hand.
//! Task creation can wake the loop early through [`TaskScheduler::waker`].

use super::state_manager::StateManager;
use super::task_claimer::TaskClaimer;
use super::task_executor::{RunningTasks, TaskExecutor};
use crate::config::SchedulerConfig;
use crate::error::PressroomResult;
use crate::models::{Pagination, Task, TaskFilter, TaskSort};
use crate::state_machine::TaskState;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Retries promoted back to `QUEUED`
    pub requeued: usize,
    /// Tasks claimed and handed to an executor
    pub dispatched: usize,
}

pub struct TaskScheduler {
    config: SchedulerConfig,
    state_manager: Arc<StateManager>,
    claimer: TaskClaimer,
    executor: Arc<TaskExecutor>,
    permits: Arc<Semaphore>,
    running: Arc<RunningTasks>,
    wake: Arc<Notify>,
    tick_lock: Mutex<()>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        state_manager: Arc<StateManager>,
        executor: Arc<TaskExecutor>,
        running: Arc<RunningTasks>,
    ) -> Self {
        let claimer = TaskClaimer::new(Arc::clone(&state_manager), config.max_concurrent_tasks);
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            claimer,
            config,
            state_manager,
            executor,
            running,
            wake: Arc::new(Notify::new()),
            tick_lock: Mutex::new(()),
        }
    }

    /// Notifier that triggers an early tick
    pub fn waker(&self) -> Arc<Notify> {
        Arc::clone(&self.wake)
    }

    pub fn running_tasks(&self) -> &Arc<RunningTasks> {
        &self.running
    }

    /// Handlers currently holding an execution permit
    pub fn running_count(&self) -> usize {
        self.config
            .max_concurrent_tasks
            .saturating_sub(self.permits.available_permits())
    }

    /// One dispatch cycle. Ticks are serialized within a process; across
    /// processes the store's atomic claim keeps dispatch exclusive.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> PressroomResult<TickReport> {
        let _guard = self.tick_lock.lock().await;
        let now = Utc::now();

        let requeued = self.promote_due_retries(now).await?;

        let mut permits: Vec<OwnedSemaphorePermit> = Vec::new();
        while permits.len() < self.config.max_concurrent_tasks {
            match Arc::clone(&self.permits).try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }
        if permits.is_empty() {
            debug!("All execution slots busy; skipping claim");
            return Ok(TickReport {
                requeued,
                dispatched: 0,
            });
        }

        let claimed = self.claimer.claim_ready_tasks(permits.len(), now).await?;
        let dispatched = claimed.len();
        for (task, permit) in claimed.into_iter().zip(permits) {
            self.dispatch(task, permit);
        }

        if requeued > 0 || dispatched > 0 {
            debug!(requeued, dispatched, "Scheduler tick");
        }
        Ok(TickReport {
            requeued,
            dispatched,
        })
    }

    async fn promote_due_retries(&self, now: DateTime<Utc>) -> PressroomResult<usize> {
        let filter = TaskFilter {
            retry_due_at: Some(now),
            ..TaskFilter::with_statuses(&[TaskState::Failed, TaskState::Timeout])
        };
        let due = self
            .state_manager
            .store()
            .find_many(
                &filter,
                TaskSort::PriorityThenCreated,
                Pagination::first(self.config.max_batch_size),
            )
            .await?;

        let mut requeued = 0;
        for task in &due {
            match self.state_manager.requeue(task).await {
                Ok(Some(_)) => requeued += 1,
                Ok(None) => {}
                Err(e) => warn!(task_id = %task.id, error = %e, "Failed to requeue task"),
            }
        }
        Ok(requeued)
    }

    fn dispatch(&self, task: Task, permit: OwnedSemaphorePermit) {
        let token = self.running.register(task.id);
        let executor = Arc::clone(&self.executor);
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let _permit = permit;
            let task_id = task.id;
            executor.execute(task, token).await;
            running.remove(task_id);
        });
    }

    /// Poll loop. Tick failures are logged and retried on the next interval.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            poll_interval_ms = self.config.poll_interval_ms,
            "Task scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
                _ = self.wake.notified() => {}
            }
            if let Err(e) = self.tick().await {
                if e.is_transient() {
                    warn!(error = %e, "Scheduler tick failed; retrying next interval");
                } else {
                    error!(error = %e, "Scheduler tick failed");
                }
            }
        }

        self.drain(Duration::from_millis(self.config.shutdown_grace_ms))
            .await;
        info!("Task scheduler stopped");
    }

    /// Signal every running handler and wait up to `grace` for them to return
    pub async fn drain(&self, grace: Duration) {
        let in_flight = self.running_count();
        if in_flight == 0 {
            return;
        }
        info!(in_flight, "Draining running handlers");
        self.running.cancel_all();

        let total = self.config.max_concurrent_tasks as u32;
        match tokio::time::timeout(grace, self.permits.acquire_many(total)).await {
            Ok(Ok(_all)) => debug!("All handlers returned"),
            Ok(Err(_)) => warn!("Execution semaphore closed during drain"),
            Err(_) => warn!(
                still_running = self.running_count(),
                "Shutdown grace period elapsed with handlers still running"
            ),
        }
    }
}
