//! Fake task handlers for integration tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use pressroom_core::error::{PressroomError, PressroomResult};
use pressroom_core::models::StageName;
use pressroom_core::registry::{HandlerOutput, TaskHandler, TaskHandlerRegistry};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Succeeds immediately, echoing its input, with an optional quality score
pub struct SucceedingHandler {
    pub quality: Option<f64>,
}

#[async_trait]
impl TaskHandler for SucceedingHandler {
    async fn execute(&self, input: Value, _cancel: CancellationToken) -> PressroomResult<HandlerOutput> {
        let output = HandlerOutput::new(json!({ "echo": input })).with_cost(0.01);
        Ok(match self.quality {
            Some(quality) => output.with_quality(quality),
            None => output,
        })
    }
}

/// Always fails, recording when each attempt started
#[derive(Default)]
pub struct FailingHandler {
    pub calls: AtomicU32,
    pub attempts: Mutex<Vec<Instant>>,
}

impl FailingHandler {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskHandler for FailingHandler {
    async fn execute(&self, _input: Value, _cancel: CancellationToken) -> PressroomResult<HandlerOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.attempts.lock().push(Instant::now());
        Err(PressroomError::HandlerExecution("upstream model unavailable".to_string()))
    }
}

/// Runs until its cancellation token fires
#[derive(Default)]
pub struct BlockingHandler {
    pub started: AtomicU32,
}

#[async_trait]
impl TaskHandler for BlockingHandler {
    async fn execute(&self, _input: Value, cancel: CancellationToken) -> PressroomResult<HandlerOutput> {
        self.started.fetch_add(1, Ordering::SeqCst);
        cancel.cancelled().await;
        Err(PressroomError::HandlerExecution("cancelled".to_string()))
    }
}

/// Logs `start:<type>` / `end:<type>` around a short sleep
pub struct RecordingHandler {
    pub task_type: &'static str,
    pub log: Arc<Mutex<Vec<String>>>,
    pub quality: Option<f64>,
}

#[async_trait]
impl TaskHandler for RecordingHandler {
    async fn execute(&self, input: Value, _cancel: CancellationToken) -> PressroomResult<HandlerOutput> {
        self.log.lock().push(format!("start:{}", self.task_type));
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        self.log.lock().push(format!("end:{}", self.task_type));

        let output = HandlerOutput::new(json!({ "stage": self.task_type, "input": input }));
        Ok(match self.quality {
            Some(quality) => output.with_quality(quality),
            None => output,
        })
    }
}

/// Register a recording handler for every pipeline stage; `generate`
/// reports `generate_quality`.
pub fn register_pipeline_handlers(
    registry: &TaskHandlerRegistry,
    generate_quality: f64,
) -> Arc<Mutex<Vec<String>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for stage in StageName::ALL {
        let task_type = stage.task_type();
        let quality = (stage == StageName::Generating).then_some(generate_quality);
        registry.register(
            task_type,
            Arc::new(RecordingHandler {
                task_type,
                log: Arc::clone(&log),
                quality,
            }),
        );
    }
    log
}
