#![allow(dead_code)]

pub mod flaky_store;
pub mod handlers;

pub use flaky_store::*;
pub use handlers::*;

use pressroom_core::config::PressroomConfig;
use pressroom_core::orchestration::OrchestrationCore;
use pressroom_core::registry::TaskHandlerRegistry;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Configuration with millisecond-scale loops so tests finish quickly
pub fn fast_config() -> PressroomConfig {
    let mut config = PressroomConfig::default();
    config.scheduler.poll_interval_ms = 5;
    config.scheduler.shutdown_grace_ms = 500;
    config.backoff.base_delay_ms = 30;
    config.backoff.max_delay_ms = 1_000;
    config.backoff.multiplier = 2.0;
    config.backoff.jitter_enabled = false;
    config.broadcast.queue_status_interval_ms = 50;
    config.pipeline.reconcile_interval_ms = 20;
    config.pipeline.metrics_interval_ms = 50;
    config
}

pub fn core_with(config: PressroomConfig, registry: Arc<TaskHandlerRegistry>) -> OrchestrationCore {
    OrchestrationCore::builder(config)
        .with_registry(registry)
        .build()
        .expect("test configuration is valid")
}

/// Poll `condition` every 5ms until it holds or `timeout` elapses
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(timeout, async {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .is_ok()
}
