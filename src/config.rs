//! # Configuration
//!
//! Layered configuration for every component, loaded with the `config` crate:
//!
//! 1. built-in defaults (the values in [`crate::constants`])
//! 2. an optional TOML file
//! 3. `PRESSROOM__<SECTION>__<KEY>` environment variables
//!
//! ```toml
//! [scheduler]
//! max_concurrent_tasks = 10
//! poll_interval_ms = 1000
//!
//! [pipeline]
//! max_concurrent_pipelines = 5
//! auto_publish_threshold = 0.85
//! ```

use crate::constants::{backoff, broadcast, limits, maintenance, pipeline};
use crate::error::{PressroomError, PressroomResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub const ENV_PREFIX: &str = "PRESSROOM";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PressroomConfig {
    pub scheduler: SchedulerConfig,
    pub backoff: BackoffConfig,
    pub maintenance: MaintenanceConfig,
    pub broadcast: BroadcastConfig,
    pub pipeline: PipelineConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Concurrency ceiling: simultaneous handler executions
    pub max_concurrent_tasks: usize,
    pub poll_interval_ms: u64,
    pub default_timeout_ms: u64,
    pub default_max_retries: u32,
    /// Upper bound for `create_tasks_batch`
    pub max_batch_size: usize,
    /// How long shutdown waits for in-flight handlers
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: limits::DEFAULT_MAX_CONCURRENT_TASKS,
            poll_interval_ms: limits::DEFAULT_POLL_INTERVAL_MS,
            default_timeout_ms: limits::DEFAULT_TASK_TIMEOUT_MS,
            default_max_retries: limits::DEFAULT_MAX_RETRIES,
            max_batch_size: limits::MAX_BATCH_SIZE,
            shutdown_grace_ms: 30_000,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    pub jitter_enabled: bool,
    /// Fraction of the delay, applied symmetrically
    pub max_jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: backoff::DEFAULT_BASE_DELAY_MS,
            max_delay_ms: backoff::DEFAULT_MAX_DELAY_MS,
            multiplier: backoff::DEFAULT_MULTIPLIER,
            jitter_enabled: false,
            max_jitter: backoff::DEFAULT_MAX_JITTER,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub enabled: bool,
    pub stale_sweep_interval_secs: u64,
    pub retention_interval_secs: u64,
    pub retention_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_sweep_interval_secs: maintenance::DEFAULT_STALE_SWEEP_INTERVAL_SECS,
            retention_interval_secs: maintenance::DEFAULT_RETENTION_INTERVAL_SECS,
            retention_days: maintenance::DEFAULT_RETENTION_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    pub queue_status_interval_ms: u64,
    pub channel_capacity: usize,
    pub failure_ratio_warning: f64,
    pub failure_ratio_critical: f64,
    pub backlog_warning: u64,
    pub backlog_critical: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            queue_status_interval_ms: broadcast::DEFAULT_QUEUE_STATUS_INTERVAL_MS,
            channel_capacity: broadcast::DEFAULT_CHANNEL_CAPACITY,
            failure_ratio_warning: broadcast::FAILURE_RATIO_WARNING,
            failure_ratio_critical: broadcast::FAILURE_RATIO_CRITICAL,
            backlog_warning: broadcast::BACKLOG_WARNING,
            backlog_critical: broadcast::BACKLOG_CRITICAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub max_concurrent_pipelines: usize,
    /// Used when a pipeline does not carry its own threshold
    pub auto_publish_threshold: f64,
    pub breaking_sla_secs: i64,
    /// Estimated duration of one stage, for `estimated_completion`
    pub stage_estimate_secs: i64,
    pub reconcile_interval_ms: u64,
    pub metrics_interval_ms: u64,
    pub max_revisions: u32,
    pub default_target_languages: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_pipelines: pipeline::DEFAULT_MAX_CONCURRENT_PIPELINES,
            auto_publish_threshold: pipeline::DEFAULT_AUTO_PUBLISH_THRESHOLD,
            breaking_sla_secs: pipeline::BREAKING_NEWS_SLA_SECS,
            stage_estimate_secs: 300,
            reconcile_interval_ms: pipeline::DEFAULT_RECONCILE_INTERVAL_MS,
            metrics_interval_ms: broadcast::DEFAULT_QUEUE_STATUS_INTERVAL_MS,
            max_revisions: pipeline::DEFAULT_MAX_REVISIONS,
            default_target_languages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// In-memory stores are used when unset
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

impl PressroomConfig {
    /// Defaults overlaid with `PRESSROOM__*` environment variables
    pub fn load() -> PressroomResult<Self> {
        Self::load_from(None::<&Path>)
    }

    /// Defaults, then `path` (TOML, required when given), then environment
    pub fn load_from(path: Option<impl AsRef<Path>>) -> PressroomResult<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Some(path) = path {
            let path = path.as_ref();
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("pipeline.default_target_languages"),
        );

        let config: PressroomConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PressroomResult<()> {
        let invalid = |msg: &str| Err(PressroomError::ConfigurationError(msg.to_string()));

        if self.scheduler.max_concurrent_tasks == 0 {
            return invalid("scheduler.max_concurrent_tasks must be greater than zero");
        }
        if self.scheduler.poll_interval_ms == 0 {
            return invalid("scheduler.poll_interval_ms must be greater than zero");
        }
        if self.scheduler.default_timeout_ms == 0 {
            return invalid("scheduler.default_timeout_ms must be greater than zero");
        }
        if self.scheduler.max_batch_size == 0 {
            return invalid("scheduler.max_batch_size must be greater than zero");
        }
        if self.backoff.multiplier < 1.0 {
            return invalid("backoff.multiplier must be at least 1.0");
        }
        if self.backoff.max_delay_ms < self.backoff.base_delay_ms {
            return invalid("backoff.max_delay_ms must not be below backoff.base_delay_ms");
        }
        if !(0.0..=1.0).contains(&self.backoff.max_jitter) {
            return invalid("backoff.max_jitter must be within 0..=1");
        }
        if self.maintenance.stale_sweep_interval_secs == 0
            || self.maintenance.retention_interval_secs == 0
        {
            return invalid("maintenance intervals must be greater than zero");
        }
        if self.maintenance.retention_days < 0 {
            return invalid("maintenance.retention_days must not be negative");
        }
        if self.broadcast.queue_status_interval_ms == 0 {
            return invalid("broadcast.queue_status_interval_ms must be greater than zero");
        }
        if self.broadcast.failure_ratio_warning > self.broadcast.failure_ratio_critical
            || self.broadcast.backlog_warning > self.broadcast.backlog_critical
        {
            return invalid("broadcast warning thresholds must not exceed critical thresholds");
        }
        if self.pipeline.max_concurrent_pipelines == 0 {
            return invalid("pipeline.max_concurrent_pipelines must be greater than zero");
        }
        if !(0.0..=1.0).contains(&self.pipeline.auto_publish_threshold) {
            return invalid("pipeline.auto_publish_threshold must be within 0..=1");
        }
        if self.pipeline.reconcile_interval_ms == 0 || self.pipeline.metrics_interval_ms == 0 {
            return invalid("pipeline intervals must be greater than zero");
        }
        Ok(())
    }
}
