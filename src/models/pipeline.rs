//! # Pipeline Model
//!
//! A pipeline drives one content item through an ordered sequence of stages,
//! each backed by at most one task at a time. Its overall status is never
//! stored independently: [`Pipeline::derive_status`] recomputes it from the
//! stage list so the two cannot drift.

use crate::models::TaskPriority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    Breaking,
    High,
    Medium,
    Low,
}

impl Urgency {
    /// Priority given to every task the pipeline creates
    pub fn task_priority(&self) -> TaskPriority {
        match self {
            Self::Breaking => TaskPriority::Urgent,
            Self::High => TaskPriority::High,
            Self::Medium => TaskPriority::Normal,
            Self::Low => TaskPriority::Low,
        }
    }

    pub fn is_breaking(&self) -> bool {
        matches!(self, Self::Breaking)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Breaking => "breaking",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl Default for Urgency {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    Researching,
    Reviewing,
    Generating,
    Translating,
    GeneratingImages,
    OptimizingSeo,
    Publishing,
}

impl StageName {
    pub const ALL: [StageName; 7] = [
        Self::Researching,
        Self::Reviewing,
        Self::Generating,
        Self::Translating,
        Self::GeneratingImages,
        Self::OptimizingSeo,
        Self::Publishing,
    ];

    /// Handler type that executes this stage
    pub fn task_type(&self) -> &'static str {
        match self {
            Self::Researching => "research",
            Self::Reviewing => "review",
            Self::Generating => "generate",
            Self::Translating => "translate",
            Self::GeneratingImages => "generate_images",
            Self::OptimizingSeo => "optimize_seo",
            Self::Publishing => "publish",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researching => "researching",
            Self::Reviewing => "reviewing",
            Self::Generating => "generating",
            Self::Translating => "translating",
            Self::GeneratingImages => "generating_images",
            Self::OptimizingSeo => "optimizing_seo",
            Self::Publishing => "publishing",
        }
    }

    /// Overall status shown while this stage is the current one
    pub fn pipeline_status(&self) -> PipelineStatus {
        match self {
            Self::Researching => PipelineStatus::Researching,
            Self::Reviewing => PipelineStatus::Reviewing,
            Self::Generating => PipelineStatus::Generating,
            Self::Translating => PipelineStatus::Translating,
            Self::GeneratingImages => PipelineStatus::GeneratingImages,
            Self::OptimizingSeo => PipelineStatus::OptimizingSeo,
            Self::Publishing => PipelineStatus::Publishing,
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|stage| stage.as_str() == s)
            .copied()
            .ok_or_else(|| format!("Invalid stage name: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Initiated,
    Researching,
    Reviewing,
    Generating,
    AwaitingHumanReview,
    Translating,
    GeneratingImages,
    OptimizingSeo,
    Publishing,
    Completed,
    Failed,
    Cancelled,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "initiated",
            Self::Researching => "researching",
            Self::Reviewing => "reviewing",
            Self::Generating => "generating",
            Self::AwaitingHumanReview => "awaiting_human_review",
            Self::Translating => "translating",
            Self::GeneratingImages => "generating_images",
            Self::OptimizingSeo => "optimizing_seo",
            Self::Publishing => "publishing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Editorial decision on a pipeline held for human review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Reject { reason: Option<String> },
    RequestRevision { feedback: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub name: StageName,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub task_ref: Option<Uuid>,
    /// Number of tasks dispatched for this stage, revisions included
    pub attempts: u32,
}

impl PipelineStage {
    pub fn new(name: StageName, status: StageStatus) -> Self {
        Self {
            name,
            status,
            started_at: None,
            completed_at: None,
            output: None,
            error: None,
            task_ref: None,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub content_ref: String,
    pub urgency: Urgency,
    pub overall_status: PipelineStatus,
    pub stages: Vec<PipelineStage>,
    pub quality_scores: BTreeMap<StageName, f64>,
    pub auto_publish: bool,
    pub auto_publish_threshold: f64,
    pub target_languages: Vec<String>,
    pub awaiting_review: bool,
    /// Outcome of the quality gate once `generating` completes
    pub auto_published: Option<bool>,
    pub revision_count: u32,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub estimated_completion: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub errors: Vec<String>,
}

impl Pipeline {
    pub fn stage(&self, name: StageName) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn stage_mut(&mut self, name: StageName) -> Option<&mut PipelineStage> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    /// Stage currently backed by `task_id`
    pub fn stage_for_task(&self, task_id: Uuid) -> Option<StageName> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::InProgress && s.task_ref == Some(task_id))
            .map(|s| s.name)
    }

    pub fn in_flight_task(&self) -> Option<Uuid> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::InProgress)
            .and_then(|s| s.task_ref)
    }

    /// First stage still waiting to run
    pub fn next_pending_stage(&self) -> Option<StageName> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Pending)
            .map(|s| s.name)
    }

    pub fn is_active(&self) -> bool {
        !self.overall_status.is_terminal()
    }

    /// Overall status as a pure function of the stages and the review flag.
    pub fn derive_status(&self) -> PipelineStatus {
        if self.cancelled {
            return PipelineStatus::Cancelled;
        }
        if self.stages.iter().any(|s| s.status == StageStatus::Failed) {
            return PipelineStatus::Failed;
        }
        if self.stages.iter().all(|s| s.status.is_terminal()) {
            return PipelineStatus::Completed;
        }
        if self.awaiting_review {
            return PipelineStatus::AwaitingHumanReview;
        }

        let started = self.stages.iter().any(|s| s.started_at.is_some());
        match self.stages.iter().find(|s| !s.status.is_terminal()) {
            Some(stage) if started => stage.name.pipeline_status(),
            _ => PipelineStatus::Initiated,
        }
    }

    /// Mean of all recorded stage quality scores
    pub fn average_quality(&self) -> Option<f64> {
        if self.quality_scores.is_empty() {
            None
        } else {
            Some(self.quality_scores.values().sum::<f64>() / self.quality_scores.len() as f64)
        }
    }
}

/// Per-topic outcome of a batch or auto-discovery initiation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub topic: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchOperationResult {
    pub initiated: Vec<Pipeline>,
    pub failed: Vec<BatchFailure>,
}

impl BatchOperationResult {
    pub fn success_count(&self) -> usize {
        self.initiated.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failed.len()
    }
}

/// Aggregate pipeline statistics published on the metrics timer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    pub total_pipelines: usize,
    pub active_pipelines: usize,
    pub completed_pipelines: usize,
    pub failed_pipelines: usize,
    pub cancelled_pipelines: usize,
    pub awaiting_review: usize,
    /// Mean `completed_at - started_at` over completed pipelines
    pub average_completion_ms: Option<f64>,
    /// Share of quality-gated pipelines that passed the gate automatically
    pub auto_publish_rate: f64,
    pub quality_score_average: Option<f64>,
    /// Completed breaking-news pipelines that finished after their estimate
    pub breaking_sla_misses: usize,
    pub generated_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline_with(statuses: &[StageStatus]) -> Pipeline {
        let now = Utc::now();
        let stages = StageName::ALL
            .iter()
            .zip(statuses.iter())
            .map(|(name, status)| {
                let mut stage = PipelineStage::new(*name, *status);
                if *status != StageStatus::Pending && *status != StageStatus::Skipped {
                    stage.started_at = Some(now);
                }
                stage
            })
            .collect();

        Pipeline {
            id: Uuid::new_v4(),
            content_ref: "topic".into(),
            urgency: Urgency::Medium,
            overall_status: PipelineStatus::Initiated,
            stages,
            quality_scores: BTreeMap::new(),
            auto_publish: true,
            auto_publish_threshold: 0.85,
            target_languages: vec![],
            awaiting_review: false,
            auto_published: None,
            revision_count: 0,
            cancelled: false,
            started_at: now,
            estimated_completion: now,
            completed_at: None,
            errors: vec![],
        }
    }

    use StageStatus::{Completed as C, Failed as F, InProgress as I, Pending as P, Skipped as S};

    #[test]
    fn status_follows_first_unfinished_stage() {
        assert_eq!(
            pipeline_with(&[P, P, P, P, P, P, P]).derive_status(),
            PipelineStatus::Initiated
        );
        assert_eq!(
            pipeline_with(&[C, S, I, P, P, P, P]).derive_status(),
            PipelineStatus::Generating
        );
        assert_eq!(
            pipeline_with(&[C, C, C, S, C, C, I]).derive_status(),
            PipelineStatus::Publishing
        );
    }

    #[test]
    fn any_failed_stage_fails_pipeline() {
        assert_eq!(
            pipeline_with(&[C, C, F, S, S, S, S]).derive_status(),
            PipelineStatus::Failed
        );
    }

    #[test]
    fn all_finished_stages_complete_pipeline() {
        assert_eq!(
            pipeline_with(&[C, S, C, S, C, C, C]).derive_status(),
            PipelineStatus::Completed
        );
    }

    #[test]
    fn review_hold_and_cancel_take_precedence() {
        let mut pipeline = pipeline_with(&[C, C, C, P, P, P, P]);
        pipeline.awaiting_review = true;
        assert_eq!(pipeline.derive_status(), PipelineStatus::AwaitingHumanReview);

        pipeline.cancelled = true;
        assert_eq!(pipeline.derive_status(), PipelineStatus::Cancelled);
    }

    #[test]
    fn breaking_news_maps_to_urgent_priority() {
        assert_eq!(Urgency::Breaking.task_priority(), TaskPriority::Urgent);
        assert_eq!(Urgency::Low.task_priority(), TaskPriority::Low);
    }
}
