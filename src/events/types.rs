use crate::constants::events;
use crate::models::{
    PipelineMetrics, PipelineStatus, QueueStatus, StageName, StageRef, StageStatus,
};
use crate::state_machine::TaskState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Typed payloads fanned out to subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SystemEvent {
    TaskStatusChanged {
        task_id: Uuid,
        task_type: String,
        /// `None` on creation
        from: Option<TaskState>,
        to: TaskState,
        retry_count: u32,
        stage_ref: Option<StageRef>,
        at: DateTime<Utc>,
    },
    QueueStatusUpdated(QueueStatus),
    PipelineAdvanced {
        pipeline_id: Uuid,
        stage: Option<StageName>,
        stage_status: Option<StageStatus>,
        overall_status: PipelineStatus,
        at: DateTime<Utc>,
    },
    PipelineMetricsUpdated(PipelineMetrics),
}

impl SystemEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::TaskStatusChanged { .. } => events::TASK_STATUS_CHANGED,
            Self::QueueStatusUpdated(_) => events::QUEUE_STATUS_UPDATED,
            Self::PipelineAdvanced { .. } => events::PIPELINE_ADVANCED,
            Self::PipelineMetricsUpdated(_) => events::PIPELINE_METRICS_UPDATED,
        }
    }

    pub fn task_id(&self) -> Option<Uuid> {
        match self {
            Self::TaskStatusChanged { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }

    pub fn pipeline_id(&self) -> Option<Uuid> {
        match self {
            Self::PipelineAdvanced { pipeline_id, .. } => Some(*pipeline_id),
            Self::TaskStatusChanged { stage_ref, .. } => stage_ref.map(|r| r.pipeline_id),
            _ => None,
        }
    }
}
