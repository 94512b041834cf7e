use super::types::SystemEvent;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

/// Which events a subscription receives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionFilter {
    All,
    /// Status changes of one task
    Task(Uuid),
    /// Status changes of tasks that back a pipeline stage
    StageTasks,
    /// Every pipeline advancement
    Pipelines,
    /// Advancements of one pipeline
    Pipeline(Uuid),
    QueueStatus,
    PipelineMetrics,
}

impl SubscriptionFilter {
    pub fn matches(&self, event: &SystemEvent) -> bool {
        match self {
            Self::All => true,
            Self::Task(id) => event.task_id() == Some(*id),
            Self::StageTasks => matches!(
                event,
                SystemEvent::TaskStatusChanged {
                    stage_ref: Some(_),
                    ..
                }
            ),
            Self::Pipelines => matches!(event, SystemEvent::PipelineAdvanced { .. }),
            Self::Pipeline(id) => {
                matches!(event, SystemEvent::PipelineAdvanced { pipeline_id, .. } if pipeline_id == id)
            }
            Self::QueueStatus => matches!(event, SystemEvent::QueueStatusUpdated(_)),
            Self::PipelineMetrics => matches!(event, SystemEvent::PipelineMetricsUpdated(_)),
        }
    }
}

/// Filtered receiver over the broadcast channel.
///
/// A subscriber that falls behind loses the oldest buffered events; the lag
/// is logged and counted, and delivery resumes from the oldest retained event.
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<SystemEvent>,
    filter: SubscriptionFilter,
    lagged: u64,
}

impl EventSubscription {
    pub(crate) fn new(receiver: broadcast::Receiver<SystemEvent>, filter: SubscriptionFilter) -> Self {
        Self {
            receiver,
            filter,
            lagged: 0,
        }
    }

    /// Next matching event, or `None` once the publisher is gone.
    pub async fn recv(&mut self) -> Option<SystemEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    self.lagged += skipped;
                    warn!(
                        skipped = skipped,
                        filter = ?self.filter,
                        "Subscriber lagged; oldest events dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<SystemEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    self.lagged += skipped;
                }
                Err(_) => return None,
            }
        }
    }

    /// Total events dropped because this subscriber fell behind
    pub fn lagged_count(&self) -> u64 {
        self.lagged
    }

    pub fn filter(&self) -> SubscriptionFilter {
        self.filter
    }
}
