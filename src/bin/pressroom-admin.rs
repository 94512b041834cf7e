//! # Pressroom Admin
//!
//! Operator CLI against a configured PostgreSQL store: inspect queue health,
//! list and manage tasks, run maintenance on demand, and validate config.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use pressroom_core::config::PressroomConfig;
use pressroom_core::models::{Pagination, TaskFilter};
use pressroom_core::orchestration::OrchestrationCore;
use pressroom_core::state_machine::TaskState;
use serde::Serialize;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "pressroom-admin")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operate the Pressroom task queue and content pipelines")]
struct Cli {
    /// TOML configuration file, layered over defaults and under PRESSROOM__* env vars
    #[arg(short, long, env = "PRESSROOM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate and print the effective configuration
    CheckConfig,
    /// Queue counts, timing averages and health
    QueueStatus,
    /// Aggregate task statistics
    Stats {
        #[arg(long)]
        task_type: Option<String>,
    },
    /// List tasks, newest first
    Tasks {
        /// QUEUED, PROCESSING, COMPLETED, FAILED, TIMEOUT or CANCELLED
        #[arg(short, long)]
        status: Option<TaskState>,
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
        #[arg(short, long, default_value_t = 0)]
        offset: usize,
    },
    /// Cancel a queued or processing task
    Cancel { task_id: Uuid },
    /// Requeue a failed or timed-out task
    Retry { task_id: Uuid },
    /// Delete finished tasks past the retention window
    Cleanup,
    /// Time out tasks stuck in PROCESSING
    Sweep {
        /// Override every task's own timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Active pipelines
    Pipelines,
    /// Pipeline metrics
    PipelineMetrics,
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to render output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    pressroom_core::logging::init_structured_logging();
    let cli = Cli::parse();

    let config = PressroomConfig::load_from(cli.config.as_ref())
        .context("Failed to load configuration")?;

    if let Command::CheckConfig = cli.command {
        return print_json(&config);
    }
    if config.database.url.is_none() {
        bail!("database.url is not set (PRESSROOM__DATABASE__URL); nothing to operate on");
    }

    let core = OrchestrationCore::builder(config)
        .connect_database()
        .await
        .context("Failed to connect to the task store")?
        .build()
        .context("Failed to assemble orchestration core")?;
    let tasks = core.tasks();

    match cli.command {
        Command::CheckConfig => print_json(core.config()),
        Command::QueueStatus => print_json(&tasks.get_queue_status().await?),
        Command::Stats { task_type } => {
            let filter = TaskFilter {
                task_type,
                ..Default::default()
            };
            print_json(&tasks.get_task_statistics(filter).await?)
        }
        Command::Tasks {
            status,
            limit,
            offset,
        } => {
            let filter = TaskFilter {
                statuses: status.map(|s| vec![s]),
                ..Default::default()
            };
            print_json(&tasks.list_tasks(filter, Pagination::new(limit, offset)).await?)
        }
        Command::Cancel { task_id } => print_json(
            &tasks
                .cancel_task(task_id)
                .await
                .with_context(|| format!("Failed to cancel task {task_id}"))?,
        ),
        Command::Retry { task_id } => print_json(
            &tasks
                .retry_task(task_id)
                .await
                .with_context(|| format!("Failed to retry task {task_id}"))?,
        ),
        Command::Cleanup => print_json(&tasks.cleanup_old_tasks().await),
        Command::Sweep { timeout_ms } => print_json(&tasks.timeout_stale_tasks(timeout_ms).await),
        Command::Pipelines => print_json(&core.pipelines().list_active().await?),
        Command::PipelineMetrics => print_json(&core.pipelines().metrics().await?),
    }
}
