//! # Orchestration Core
//!
//! Single bootstrap path for the queue and the pipeline orchestrator. The
//! builder assembles stores, registry, event bus, scheduler, broadcaster,
//! maintenance and pipelines from one [`PressroomConfig`]; `start()` spawns
//! the background loops and `shutdown()` stops them.
//!
//! ```rust,no_run
//! use pressroom_core::config::PressroomConfig;
//! use pressroom_core::orchestration::OrchestrationCore;
//!
//! # async fn example() -> pressroom_core::error::PressroomResult<()> {
//! let core = OrchestrationCore::builder(PressroomConfig::load()?).build()?;
//! core.start();
//! // ... register handlers, create tasks, initiate pipelines ...
//! core.shutdown().await;
//! # Ok(())
//! # }
//! ```

use super::backoff_calculator::BackoffCalculator;
use super::queue_status::QueueStatusCalculator;
use super::retention_service::RetentionService;
use super::scheduler::TaskScheduler;
use super::staleness_detector::StalenessDetector;
use super::state_manager::StateManager;
use super::status_broadcaster::StatusBroadcaster;
use super::task_executor::{RunningTasks, TaskExecutor};
use super::task_service::TaskService;
use crate::config::PressroomConfig;
use crate::error::PressroomResult;
use crate::events::EventPublisher;
use crate::pipeline::{PipelineOrchestrator, TopicDiscovery};
use crate::registry::TaskHandlerRegistry;
use crate::store::{InMemoryPipelineStore, InMemoryTaskStore, PipelineStore, TaskStore};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub struct OrchestrationCoreBuilder {
    config: PressroomConfig,
    task_store: Option<Arc<dyn TaskStore>>,
    pipeline_store: Option<Arc<dyn PipelineStore>>,
    registry: Option<Arc<TaskHandlerRegistry>>,
    discovery: Option<Arc<dyn TopicDiscovery>>,
}

impl OrchestrationCoreBuilder {
    pub fn with_task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.task_store = Some(store);
        self
    }

    pub fn with_pipeline_store(mut self, store: Arc<dyn PipelineStore>) -> Self {
        self.pipeline_store = Some(store);
        self
    }

    pub fn with_registry(mut self, registry: Arc<TaskHandlerRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_topic_discovery(mut self, discovery: Arc<dyn TopicDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    /// Connect PostgreSQL stores when `database.url` is set; otherwise the
    /// builder is returned unchanged and in-memory stores are used.
    #[cfg(feature = "postgres")]
    pub async fn connect_database(mut self) -> PressroomResult<Self> {
        use crate::store::{postgres::ensure_schema, PgPipelineStore, PgTaskStore};
        use sqlx::postgres::PgPoolOptions;

        let Some(url) = self.config.database.url.clone() else {
            return Ok(self);
        };
        let pool = PgPoolOptions::new()
            .max_connections(self.config.database.max_connections)
            .connect(&url)
            .await?;
        ensure_schema(&pool).await?;
        info!(
            max_connections = self.config.database.max_connections,
            "Connected PostgreSQL stores"
        );

        self.task_store = Some(Arc::new(PgTaskStore::new(pool.clone())));
        self.pipeline_store = Some(Arc::new(PgPipelineStore::new(pool)));
        Ok(self)
    }

    pub fn build(self) -> PressroomResult<OrchestrationCore> {
        let config = self.config;
        config.validate()?;

        let task_store = self.task_store.unwrap_or_else(|| {
            info!("Using in-memory task store");
            Arc::new(InMemoryTaskStore::new())
        });
        let pipeline_store = self
            .pipeline_store
            .unwrap_or_else(|| Arc::new(InMemoryPipelineStore::new()));
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(TaskHandlerRegistry::new()));

        let publisher = EventPublisher::new(config.broadcast.channel_capacity);
        let broadcaster = Arc::new(StatusBroadcaster::new(
            publisher.clone(),
            QueueStatusCalculator::new(Arc::clone(&task_store), config.broadcast.clone()),
            config.broadcast.clone(),
        ));
        let state_manager = Arc::new(StateManager::new(
            Arc::clone(&task_store),
            Arc::clone(&broadcaster),
            BackoffCalculator::new(config.backoff.clone()),
        ));

        let running = Arc::new(RunningTasks::new());
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&registry),
            Arc::clone(&state_manager),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            config.scheduler.clone(),
            Arc::clone(&state_manager),
            executor,
            Arc::clone(&running),
        ));
        let staleness = Arc::new(StalenessDetector::new(
            Arc::clone(&state_manager),
            Arc::clone(&running),
            config.maintenance.clone(),
        ));
        let retention = Arc::new(RetentionService::new(
            Arc::clone(&state_manager),
            config.maintenance.clone(),
        ));
        let task_service = Arc::new(TaskService::new(
            config.scheduler.clone(),
            Arc::clone(&registry),
            state_manager,
            running,
            Arc::clone(&staleness),
            Arc::clone(&retention),
            scheduler.waker(),
        ));
        let pipelines = Arc::new(PipelineOrchestrator::new(
            config.pipeline.clone(),
            pipeline_store,
            Arc::clone(&task_service),
            publisher.clone(),
            self.discovery,
        ));

        Ok(OrchestrationCore {
            config,
            registry,
            publisher,
            broadcaster,
            scheduler,
            task_service,
            pipelines,
            staleness,
            retention,
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        })
    }
}

/// The assembled runtime
pub struct OrchestrationCore {
    config: PressroomConfig,
    registry: Arc<TaskHandlerRegistry>,
    publisher: EventPublisher,
    broadcaster: Arc<StatusBroadcaster>,
    scheduler: Arc<TaskScheduler>,
    task_service: Arc<TaskService>,
    pipelines: Arc<PipelineOrchestrator>,
    staleness: Arc<StalenessDetector>,
    retention: Arc<RetentionService>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl OrchestrationCore {
    pub fn builder(config: PressroomConfig) -> OrchestrationCoreBuilder {
        OrchestrationCoreBuilder {
            config,
            task_store: None,
            pipeline_store: None,
            registry: None,
            discovery: None,
        }
    }

    pub fn config(&self) -> &PressroomConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TaskHandlerRegistry> {
        &self.registry
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn tasks(&self) -> &Arc<TaskService> {
        &self.task_service
    }

    pub fn pipelines(&self) -> &Arc<PipelineOrchestrator> {
        &self.pipelines
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn is_running(&self) -> bool {
        !self.handles.lock().is_empty()
    }

    /// Spawn the background loops. Calling it again while running is a no-op.
    pub fn start(&self) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            warn!("Orchestration core already started");
            return;
        }
        if self.shutdown.is_cancelled() {
            warn!("Orchestration core was shut down; not restarting");
            return;
        }

        handles.push(tokio::spawn(
            Arc::clone(&self.scheduler).run(self.shutdown.child_token()),
        ));
        handles.push(tokio::spawn(
            Arc::clone(&self.broadcaster).run(self.shutdown.child_token()),
        ));
        handles.push(tokio::spawn(
            Arc::clone(&self.pipelines).run(self.shutdown.child_token()),
        ));
        if self.config.maintenance.enabled {
            handles.push(tokio::spawn(
                Arc::clone(&self.staleness).run(self.shutdown.child_token()),
            ));
            handles.push(tokio::spawn(
                Arc::clone(&self.retention).run(self.shutdown.child_token()),
            ));
        }

        info!(
            loops = handles.len(),
            registered_handlers = self.registry.stats().total_handlers,
            "Orchestration core started"
        );
    }

    /// Stop every loop, signal running handlers, and wait for the loops to exit
    pub async fn shutdown(&self) {
        info!("Shutting down orchestration core");
        self.shutdown.cancel();

        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Background loop terminated abnormally");
            }
        }
        info!("Orchestration core stopped");
    }
}
