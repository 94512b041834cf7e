//! # Pipeline Orchestrator
//!
//! Drives each content item through its stage sequence by creating one task
//! per stage and reacting to those tasks' terminal outcomes.
//!
//! ## Flow
//!
//! ```text
//! initiate ─▶ researching ─▶ reviewing* ─▶ generating ─┬─▶ translating* ─▶ generating_images ─▶ optimizing_seo ─▶ publishing ─▶ completed
//!                                                      └─▶ awaiting_human_review ─(approve)─┘
//! ```
//!
//! `*` skipped for breaking news (reviewing) or when no target languages are
//! set (translating).
//!
//! ## Consistency
//!
//! Every mutation (initiation, advancement, review decisions, cancel, retry)
//! runs under one async mutex, so the admission check against
//! `max_concurrent_pipelines` and stage advancement never interleave. Task
//! outcomes arrive through the event bus; a periodic reconcile pass re-reads
//! in-flight tasks from the store so a lagged subscription cannot strand a
//! pipeline.

use super::discovery::TopicDiscovery;
use super::metrics::compute_metrics;
use super::stages::{active_stage_count, estimate_completion, plan_stages, stage_input};
use crate::config::PipelineConfig;
use crate::error::{PressroomError, PressroomResult};
use crate::events::{EventPublisher, SubscriptionFilter, SystemEvent};
use crate::models::{
    BatchFailure, BatchOperationResult, NewTask, Pipeline, PipelineMetrics, PipelineStatus,
    ReviewDecision, StageName, StageRef, StageStatus, Task, Urgency,
};
use crate::orchestration::TaskService;
use crate::state_machine::{TaskState, TaskStateMachine};
use crate::store::PipelineStore;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Parameters for starting one pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRequest {
    pub topic: String,
    #[serde(default)]
    pub urgency: Urgency,
    /// Falls back to the configured default languages when unset
    pub target_languages: Option<Vec<String>>,
    #[serde(default = "default_auto_publish")]
    pub auto_publish: bool,
    /// Overrides the configured auto-publish threshold
    pub quality_threshold: Option<f64>,
}

fn default_auto_publish() -> bool {
    true
}

impl PipelineRequest {
    pub fn new(topic: impl Into<String>, urgency: Urgency) -> Self {
        Self {
            topic: topic.into(),
            urgency,
            target_languages: None,
            auto_publish: true,
            quality_threshold: None,
        }
    }

    pub fn with_target_languages(mut self, languages: Vec<String>) -> Self {
        self.target_languages = Some(languages);
        self
    }

    pub fn with_auto_publish(mut self, auto_publish: bool) -> Self {
        self.auto_publish = auto_publish;
        self
    }

    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = Some(threshold);
        self
    }
}

pub struct PipelineOrchestrator {
    config: PipelineConfig,
    pipelines: Arc<dyn PipelineStore>,
    tasks: Arc<TaskService>,
    publisher: EventPublisher,
    discovery: Option<Arc<dyn TopicDiscovery>>,
    lock: Mutex<()>,
}

impl PipelineOrchestrator {
    pub fn new(
        config: PipelineConfig,
        pipelines: Arc<dyn PipelineStore>,
        tasks: Arc<TaskService>,
        publisher: EventPublisher,
        discovery: Option<Arc<dyn TopicDiscovery>>,
    ) -> Self {
        Self {
            config,
            pipelines,
            tasks,
            publisher,
            discovery,
            lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ---- public operations -------------------------------------------------

    /// Start a pipeline for `request.topic` and dispatch its first stage.
    ///
    /// Rejected with `CapacityExceeded` once `max_concurrent_pipelines`
    /// pipelines are active; nothing is created in that case.
    #[instrument(skip(self, request), fields(topic = %request.topic, urgency = %request.urgency))]
    pub async fn initiate(&self, request: PipelineRequest) -> PressroomResult<Pipeline> {
        let threshold = request
            .quality_threshold
            .unwrap_or(self.config.auto_publish_threshold);
        if request.topic.trim().is_empty() {
            return Err(PressroomError::ValidationError(
                "topic must not be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&threshold) {
            return Err(PressroomError::ValidationError(format!(
                "quality threshold must be within 0..=1 (got {threshold})"
            )));
        }
        let target_languages = request
            .target_languages
            .unwrap_or_else(|| self.config.default_target_languages.clone());
        let stages = plan_stages(request.urgency, &target_languages);
        self.ensure_handlers(&stages)?;

        let _guard = self.lock.lock().await;
        self.ensure_capacity().await?;

        let now = Utc::now();
        let mut pipeline = Pipeline {
            id: Uuid::new_v4(),
            content_ref: request.topic,
            urgency: request.urgency,
            overall_status: PipelineStatus::Initiated,
            estimated_completion: estimate_completion(
                now,
                request.urgency,
                active_stage_count(&stages),
                &self.config,
            ),
            stages,
            quality_scores: BTreeMap::new(),
            auto_publish: request.auto_publish,
            auto_publish_threshold: threshold,
            target_languages,
            awaiting_review: false,
            auto_published: None,
            revision_count: 0,
            cancelled: false,
            started_at: now,
            completed_at: None,
            errors: Vec::new(),
        };
        pipeline = self.pipelines.insert(pipeline).await?;
        info!(pipeline_id = %pipeline.id, "Pipeline initiated");

        let stage = self.advance(&mut pipeline).await;
        self.persist(&mut pipeline, stage).await?;
        Ok(pipeline)
    }

    /// Cancel an active pipeline. The in-flight task is cancelled (its
    /// handler's token fires) and every unfinished stage becomes `skipped`.
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: Uuid) -> PressroomResult<Pipeline> {
        let _guard = self.lock.lock().await;
        let mut pipeline = self.load(id).await?;
        if !pipeline.is_active() {
            return Err(PressroomError::invalid_state(
                "pipeline",
                id,
                pipeline.overall_status,
                "cancel",
            ));
        }

        if let Some(task_id) = pipeline.in_flight_task() {
            match self.tasks.cancel_task(task_id).await {
                Ok(_) => debug!(task_id = %task_id, "Cancelled in-flight stage task"),
                Err(PressroomError::InvalidState { status, .. }) => {
                    debug!(task_id = %task_id, status = %status, "Stage task already finished")
                }
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to cancel stage task"),
            }
        }

        let now = Utc::now();
        for stage in pipeline.stages.iter_mut().filter(|s| !s.status.is_terminal()) {
            stage.status = StageStatus::Skipped;
            stage.completed_at = Some(now);
        }
        // An unresolved review hold is kept so a retry resumes it.
        pipeline.cancelled = true;
        info!(pipeline_id = %id, "Pipeline cancelled");

        self.persist(&mut pipeline, None).await?;
        Ok(pipeline)
    }

    /// Rerun a failed or cancelled pipeline from its first unfinished stage.
    /// Completed stages and their output are kept.
    #[instrument(skip(self))]
    pub async fn retry(&self, id: Uuid) -> PressroomResult<Pipeline> {
        let _guard = self.lock.lock().await;
        let mut pipeline = self.load(id).await?;
        if !matches!(
            pipeline.overall_status,
            PipelineStatus::Failed | PipelineStatus::Cancelled
        ) {
            return Err(PressroomError::invalid_state(
                "pipeline",
                id,
                pipeline.overall_status,
                "retry",
            ));
        }
        self.ensure_capacity().await?;

        let planned = plan_stages(pipeline.urgency, &pipeline.target_languages);
        for (stage, fresh) in pipeline.stages.iter_mut().zip(planned) {
            if stage.status != StageStatus::Completed {
                let attempts = stage.attempts;
                *stage = fresh;
                stage.attempts = attempts;
                if stage.name == StageName::Generating {
                    pipeline.auto_published = None;
                    pipeline.quality_scores.remove(&StageName::Generating);
                }
            }
        }
        pipeline.cancelled = false;
        pipeline.awaiting_review = pipeline.awaiting_review
            && pipeline
                .stage(StageName::Generating)
                .is_some_and(|s| s.status == StageStatus::Completed);
        pipeline.completed_at = None;

        let now = Utc::now();
        let remaining = pipeline
            .stages
            .iter()
            .filter(|s| s.status == StageStatus::Pending)
            .count();
        pipeline.estimated_completion =
            estimate_completion(now, pipeline.urgency, remaining, &self.config);
        info!(pipeline_id = %id, remaining, "Pipeline retried");

        let stage = self.advance(&mut pipeline).await;
        self.persist(&mut pipeline, stage).await?;
        Ok(pipeline)
    }

    /// Initiate one pipeline per topic; each topic succeeds or fails on its own.
    pub async fn batch_initiate(
        &self,
        topics: Vec<String>,
        urgency: Urgency,
        auto_publish: bool,
    ) -> BatchOperationResult {
        let requests = topics
            .into_iter()
            .map(|topic| PipelineRequest::new(topic, urgency).with_auto_publish(auto_publish));
        self.initiate_each(requests).await
    }

    /// Pull up to `max_topics` topics from the configured discovery source and
    /// initiate a pipeline for each.
    pub async fn auto_discover_and_initiate(
        &self,
        max_topics: usize,
        urgency_filter: Option<Urgency>,
        auto_publish: bool,
    ) -> PressroomResult<BatchOperationResult> {
        let discovery = self.discovery.as_ref().ok_or_else(|| {
            PressroomError::ConfigurationError("no topic discovery source configured".to_string())
        })?;

        // Only draw what can start now; the rest stays with the source.
        let free_slots = self
            .config
            .max_concurrent_pipelines
            .saturating_sub(self.pipelines.count_active().await?);
        let max_topics = max_topics.min(free_slots);
        if max_topics == 0 {
            info!(free_slots, "No pipeline capacity for discovered topics");
            return Ok(BatchOperationResult::default());
        }

        let topics = discovery.discover(max_topics, urgency_filter).await?;
        info!(discovered = topics.len(), "Discovered topics for auto-initiation");

        let requests = topics.into_iter().map(|topic| {
            PipelineRequest::new(topic.topic, topic.urgency).with_auto_publish(auto_publish)
        });
        Ok(self.initiate_each(requests).await)
    }

    async fn initiate_each(
        &self,
        requests: impl Iterator<Item = PipelineRequest>,
    ) -> BatchOperationResult {
        let mut result = BatchOperationResult::default();
        for request in requests {
            let topic = request.topic.clone();
            match self.initiate(request).await {
                Ok(pipeline) => result.initiated.push(pipeline),
                Err(e) => result.failed.push(BatchFailure {
                    topic,
                    error: e.to_string(),
                }),
            }
        }
        info!(
            initiated = result.success_count(),
            failed = result.failure_count(),
            "Batch initiation finished"
        );
        result
    }

    pub async fn get(&self, id: Uuid) -> PressroomResult<Pipeline> {
        self.load(id).await
    }

    pub async fn list_active(&self) -> PressroomResult<Vec<Pipeline>> {
        self.pipelines.list(true).await
    }

    pub async fn metrics(&self) -> PressroomResult<PipelineMetrics> {
        let pipelines = self.pipelines.list(false).await?;
        Ok(compute_metrics(&pipelines, Utc::now()))
    }

    pub async fn publish_metrics(&self) -> PressroomResult<PipelineMetrics> {
        let metrics = self.metrics().await?;
        self.publisher
            .publish(SystemEvent::PipelineMetricsUpdated(metrics.clone()));
        Ok(metrics)
    }

    /// Resolve a pipeline held in `awaiting_human_review`
    #[instrument(skip(self, decision))]
    pub async fn submit_review_decision(
        &self,
        id: Uuid,
        decision: ReviewDecision,
    ) -> PressroomResult<Pipeline> {
        let _guard = self.lock.lock().await;
        let mut pipeline = self.load(id).await?;
        if !pipeline.awaiting_review || !pipeline.is_active() {
            return Err(PressroomError::invalid_state(
                "pipeline",
                id,
                pipeline.overall_status,
                "review",
            ));
        }
        pipeline.awaiting_review = false;

        let stage = match decision {
            ReviewDecision::Approve => {
                info!(pipeline_id = %id, "Review approved");
                self.advance(&mut pipeline).await
            }
            ReviewDecision::Reject { reason } => {
                let reason = reason.unwrap_or_else(|| "no reason given".to_string());
                info!(pipeline_id = %id, reason = %reason, "Review rejected");
                Self::fail_stage(
                    &mut pipeline,
                    StageName::Generating,
                    format!("rejected in review: {reason}"),
                );
                Some(StageName::Generating)
            }
            ReviewDecision::RequestRevision { feedback } => {
                if pipeline.revision_count >= self.config.max_revisions {
                    warn!(pipeline_id = %id, revisions = pipeline.revision_count, "Revision limit reached");
                    Self::fail_stage(
                        &mut pipeline,
                        StageName::Generating,
                        format!(
                            "revision limit of {} reached",
                            self.config.max_revisions
                        ),
                    );
                } else {
                    pipeline.revision_count += 1;
                    pipeline.auto_published = None;
                    pipeline.quality_scores.remove(&StageName::Generating);
                    if let Some(stage) = pipeline.stage_mut(StageName::Generating) {
                        stage.status = StageStatus::Pending;
                        stage.completed_at = None;
                    }
                    info!(pipeline_id = %id, revision = pipeline.revision_count, "Revision requested");
                    self.dispatch_stage(&mut pipeline, StageName::Generating, Some(&feedback))
                        .await;
                }
                Some(StageName::Generating)
            }
        };

        self.persist(&mut pipeline, stage).await?;
        Ok(pipeline)
    }

    // ---- task outcome handling ---------------------------------------------

    /// React to a stage task's status change
    pub async fn handle_event(&self, event: &SystemEvent) -> PressroomResult<()> {
        if let SystemEvent::TaskStatusChanged {
            task_id,
            to,
            stage_ref: Some(stage_ref),
            ..
        } = event
        {
            if matches!(
                to,
                TaskState::Completed | TaskState::Failed | TaskState::Cancelled
            ) {
                self.apply_task_outcome(stage_ref.pipeline_id, *task_id)
                    .await?;
            }
        }
        Ok(())
    }

    /// Re-read every active pipeline's in-flight task and resume pipelines
    /// that have no task in flight but still have work to do.
    pub async fn reconcile(&self) -> PressroomResult<usize> {
        let mut advanced = 0;
        for pipeline in self.pipelines.list(true).await? {
            let outcome = match pipeline.in_flight_task() {
                Some(task_id) => self.apply_task_outcome(pipeline.id, task_id).await,
                None => self.resume(pipeline.id).await,
            };
            match outcome {
                Ok(true) => advanced += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(pipeline_id = %pipeline.id, error = %e, "Failed to reconcile pipeline")
                }
            }
        }
        if advanced > 0 {
            debug!(advanced, "Reconciled pipelines");
        }
        Ok(advanced)
    }

    async fn resume(&self, id: Uuid) -> PressroomResult<bool> {
        let _guard = self.lock.lock().await;
        let mut pipeline = self.load(id).await?;
        if !pipeline.is_active()
            || pipeline.awaiting_review
            || pipeline.in_flight_task().is_some()
        {
            return Ok(false);
        }
        let stage = self.advance(&mut pipeline).await;
        self.persist(&mut pipeline, stage).await?;
        Ok(true)
    }

    async fn apply_task_outcome(&self, pipeline_id: Uuid, task_id: Uuid) -> PressroomResult<bool> {
        let _guard = self.lock.lock().await;
        let mut pipeline = match self.pipelines.find_by_id(pipeline_id).await? {
            Some(pipeline) if pipeline.is_active() => pipeline,
            _ => return Ok(false),
        };
        let Some(stage) = pipeline.stage_for_task(task_id) else {
            return Ok(false);
        };
        let task = self.tasks.get_task(task_id).await?;

        match task.status {
            TaskState::Completed => self.complete_stage(&mut pipeline, stage, &task).await,
            TaskState::Failed if TaskStateMachine::is_terminal(&task) => {
                let error = task
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "task failed".to_string());
                Self::fail_stage(&mut pipeline, stage, error);
            }
            TaskState::Cancelled => {
                Self::fail_stage(&mut pipeline, stage, "stage task was cancelled".to_string())
            }
            _ => return Ok(false),
        }

        self.persist(&mut pipeline, Some(stage)).await?;
        Ok(true)
    }

    async fn complete_stage(&self, pipeline: &mut Pipeline, name: StageName, task: &Task) {
        let now = Utc::now();
        if let Some(stage) = pipeline.stage_mut(name) {
            stage.status = StageStatus::Completed;
            stage.completed_at = Some(now);
            stage.output = task.output_data.clone();
            stage.error = None;
        }
        if let Some(score) = task.quality_score {
            pipeline.quality_scores.insert(name, score);
        }
        info!(
            pipeline_id = %pipeline.id,
            stage = %name,
            quality_score = ?task.quality_score,
            "Stage completed"
        );

        if name == StageName::Generating {
            let passed = pipeline.auto_publish
                && task
                    .quality_score
                    .map_or(false, |score| score >= pipeline.auto_publish_threshold);
            pipeline.auto_published = Some(passed);
            if !passed {
                info!(
                    pipeline_id = %pipeline.id,
                    quality_score = ?task.quality_score,
                    threshold = pipeline.auto_publish_threshold,
                    auto_publish = pipeline.auto_publish,
                    "Holding pipeline for human review"
                );
                pipeline.awaiting_review = true;
                return;
            }
        }

        self.advance(pipeline).await;
    }

    /// Mark `name` failed and every stage still waiting `skipped`.
    /// Completed stages keep their output.
    fn fail_stage(pipeline: &mut Pipeline, name: StageName, error: String) {
        let now = Utc::now();
        warn!(pipeline_id = %pipeline.id, stage = %name, error = %error, "Stage failed");
        if let Some(stage) = pipeline.stage_mut(name) {
            stage.status = StageStatus::Failed;
            stage.completed_at = Some(now);
            stage.error = Some(error.clone());
        }
        for stage in pipeline.stages.iter_mut().filter(|s| !s.status.is_terminal()) {
            stage.status = StageStatus::Skipped;
        }
        pipeline.errors.push(format!("{name}: {error}"));
    }

    // ---- advancement -------------------------------------------------------

    /// Dispatch the next pending stage unless the pipeline is blocked or done.
    /// Returns the stage that changed, if any.
    async fn advance(&self, pipeline: &mut Pipeline) -> Option<StageName> {
        if pipeline.cancelled || pipeline.awaiting_review || pipeline.in_flight_task().is_some() {
            return None;
        }
        if pipeline.stages.iter().any(|s| s.status == StageStatus::Failed) {
            return None;
        }
        let next = pipeline.next_pending_stage()?;
        self.dispatch_stage(pipeline, next, None).await;
        Some(next)
    }

    async fn dispatch_stage(
        &self,
        pipeline: &mut Pipeline,
        name: StageName,
        revision_feedback: Option<&str>,
    ) {
        let new_task = NewTask::new(name.task_type(), stage_input(pipeline, name, revision_feedback))
            .with_priority(pipeline.urgency.task_priority())
            .for_stage(StageRef {
                pipeline_id: pipeline.id,
                stage: name,
            });

        match self.tasks.create_task(new_task).await {
            Ok(task) => {
                if let Some(stage) = pipeline.stage_mut(name) {
                    stage.status = StageStatus::InProgress;
                    stage.started_at = Some(Utc::now());
                    stage.completed_at = None;
                    stage.error = None;
                    stage.task_ref = Some(task.id);
                    stage.attempts += 1;
                }
                debug!(pipeline_id = %pipeline.id, stage = %name, task_id = %task.id, "Stage dispatched");
            }
            Err(e) if e.is_transient() => {
                // Left pending; the reconcile pass dispatches it later.
                warn!(pipeline_id = %pipeline.id, stage = %name, error = %e, "Stage dispatch deferred");
            }
            Err(e) => Self::fail_stage(pipeline, name, format!("dispatch failed: {e}")),
        }
    }

    /// Recompute the overall status, save, and announce the change
    async fn persist(&self, pipeline: &mut Pipeline, stage: Option<StageName>) -> PressroomResult<()> {
        let previous = pipeline.overall_status;
        pipeline.overall_status = pipeline.derive_status();
        if pipeline.overall_status.is_terminal() && pipeline.completed_at.is_none() {
            pipeline.completed_at = Some(Utc::now());
        }
        self.pipelines.save(pipeline).await?;

        if previous != pipeline.overall_status {
            info!(
                pipeline_id = %pipeline.id,
                from = %previous,
                to = %pipeline.overall_status,
                "Pipeline status changed"
            );
        }
        self.publisher.publish(SystemEvent::PipelineAdvanced {
            pipeline_id: pipeline.id,
            stage,
            stage_status: stage.and_then(|name| pipeline.stage(name)).map(|s| s.status),
            overall_status: pipeline.overall_status,
            at: Utc::now(),
        });
        Ok(())
    }

    // ---- helpers -----------------------------------------------------------

    async fn load(&self, id: Uuid) -> PressroomResult<Pipeline> {
        self.pipelines
            .find_by_id(id)
            .await?
            .ok_or_else(|| PressroomError::not_found("pipeline", id))
    }

    async fn ensure_capacity(&self) -> PressroomResult<()> {
        let active = self.pipelines.count_active().await?;
        let limit = self.config.max_concurrent_pipelines;
        if active >= limit {
            warn!(active, limit, "Pipeline capacity reached");
            return Err(PressroomError::CapacityExceeded { active, limit });
        }
        Ok(())
    }

    fn ensure_handlers(&self, stages: &[crate::models::PipelineStage]) -> PressroomResult<()> {
        let registry = self.tasks.registry();
        let missing: Vec<&str> = stages
            .iter()
            .filter(|s| s.status != StageStatus::Skipped)
            .map(|s| s.name.task_type())
            .filter(|task_type| !registry.is_registered(task_type))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PressroomError::ValidationError(format!(
                "no handler registered for stage task types: {}",
                missing.join(", ")
            )))
        }
    }

    // ---- background loop ---------------------------------------------------

    /// Event listener plus reconcile and metrics timers
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut events = self.publisher.subscribe(SubscriptionFilter::StageTasks);
        let mut reconcile =
            tokio::time::interval(Duration::from_millis(self.config.reconcile_interval_ms));
        reconcile.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut metrics =
            tokio::time::interval(Duration::from_millis(self.config.metrics_interval_ms));
        metrics.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            max_concurrent_pipelines = self.config.max_concurrent_pipelines,
            "Pipeline orchestrator started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(&event).await {
                            warn!(error = %e, "Failed to apply stage task outcome; reconcile will retry");
                        }
                    }
                    None => {
                        error!("Event channel closed; pipeline orchestrator stopping");
                        break;
                    }
                },
                _ = reconcile.tick() => {
                    if let Err(e) = self.reconcile().await {
                        warn!(error = %e, "Pipeline reconcile failed; retrying next interval");
                    }
                }
                _ = metrics.tick() => {
                    if let Err(e) = self.publish_metrics().await {
                        warn!(error = %e, "Pipeline metrics broadcast failed");
                    }
                }
            }
        }
        info!("Pipeline orchestrator stopped");
    }
}
