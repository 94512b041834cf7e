//! Pipeline metrics aggregation.

use crate::models::{Pipeline, PipelineMetrics, PipelineStatus};
use chrono::{DateTime, Utc};

pub fn compute_metrics(pipelines: &[Pipeline], now: DateTime<Utc>) -> PipelineMetrics {
    let mut metrics = PipelineMetrics {
        total_pipelines: pipelines.len(),
        generated_at: Some(now),
        ..Default::default()
    };

    let mut completion_sum = 0i64;
    let mut gated = 0usize;
    let mut auto_published = 0usize;
    let mut quality_sum = 0.0;
    let mut quality_count = 0usize;

    for pipeline in pipelines {
        match pipeline.overall_status {
            PipelineStatus::Completed => {
                metrics.completed_pipelines += 1;
                if let Some(completed_at) = pipeline.completed_at {
                    completion_sum += (completed_at - pipeline.started_at).num_milliseconds().max(0);
                    if pipeline.urgency.is_breaking() && completed_at > pipeline.estimated_completion {
                        metrics.breaking_sla_misses += 1;
                    }
                }
            }
            PipelineStatus::Failed => metrics.failed_pipelines += 1,
            PipelineStatus::Cancelled => metrics.cancelled_pipelines += 1,
            PipelineStatus::AwaitingHumanReview => {
                metrics.active_pipelines += 1;
                metrics.awaiting_review += 1;
            }
            _ => metrics.active_pipelines += 1,
        }

        if let Some(passed) = pipeline.auto_published {
            gated += 1;
            if passed {
                auto_published += 1;
            }
        }
        if let Some(quality) = pipeline.average_quality() {
            quality_sum += quality;
            quality_count += 1;
        }
    }

    if metrics.completed_pipelines > 0 {
        metrics.average_completion_ms =
            Some(completion_sum as f64 / metrics.completed_pipelines as f64);
    }
    if gated > 0 {
        metrics.auto_publish_rate = auto_published as f64 / gated as f64;
    }
    if quality_count > 0 {
        metrics.quality_score_average = Some(quality_sum / quality_count as f64);
    }
    metrics
}
