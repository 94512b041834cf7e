//! Stage planning: which stages a pipeline runs, what each stage's task
//! receives as input, and when the whole pipeline is expected to finish.

use crate::config::PipelineConfig;
use crate::models::{Pipeline, PipelineStage, StageName, StageStatus, Urgency};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};

/// Initial stage list. Breaking news skips `reviewing`; `translating` is
/// skipped when there is nothing to translate into.
pub fn plan_stages(urgency: Urgency, target_languages: &[String]) -> Vec<PipelineStage> {
    StageName::ALL
        .iter()
        .map(|&name| {
            let skipped = match name {
                StageName::Reviewing => urgency.is_breaking(),
                StageName::Translating => target_languages.is_empty(),
                _ => false,
            };
            let status = if skipped {
                StageStatus::Skipped
            } else {
                StageStatus::Pending
            };
            PipelineStage::new(name, status)
        })
        .collect()
}

/// Stages that will (or did) run a task
pub fn active_stage_count(stages: &[PipelineStage]) -> usize {
    stages
        .iter()
        .filter(|s| s.status != StageStatus::Skipped)
        .count()
}

/// Soft completion estimate. Breaking news carries a fixed SLA; everything
/// else is `stage_estimate_secs` per stage still to run.
pub fn estimate_completion(
    from: DateTime<Utc>,
    urgency: Urgency,
    remaining_stages: usize,
    config: &PipelineConfig,
) -> DateTime<Utc> {
    if urgency.is_breaking() {
        from + Duration::seconds(config.breaking_sla_secs)
    } else {
        from + Duration::seconds(config.stage_estimate_secs * remaining_stages as i64)
    }
}

/// Task input for `stage`: the topic and settings plus every completed
/// stage's output keyed by stage name.
pub fn stage_input(pipeline: &Pipeline, stage: StageName, revision_feedback: Option<&str>) -> Value {
    let previous: Map<String, Value> = pipeline
        .stages
        .iter()
        .filter(|s| s.status == StageStatus::Completed)
        .filter_map(|s| s.output.clone().map(|out| (s.name.as_str().to_string(), out)))
        .collect();

    let mut input = json!({
        "pipeline_id": pipeline.id,
        "topic": pipeline.content_ref,
        "urgency": pipeline.urgency,
        "stage": stage,
        "target_languages": pipeline.target_languages,
        "previous": previous,
    });
    if let (Some(feedback), Some(object)) = (revision_feedback, input.as_object_mut()) {
        object.insert("revision_feedback".to_string(), json!(feedback));
        object.insert("revision".to_string(), json!(pipeline.revision_count));
    }
    input
}
