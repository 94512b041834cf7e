//! # PostgreSQL Stores
//!
//! Durable task and pipeline storage over `sqlx`.
//!
//! ## Claiming
//!
//! `claim_ready` selects the dispatch window with `FOR UPDATE SKIP LOCKED`
//! inside the same statement that flips it to `PROCESSING`, so concurrent
//! schedulers (or ticks) partition the ready set instead of racing for it.
//!
//! ## Conditional Updates
//!
//! `update_if` appends `status = ANY($n)` (and optionally `retry_count = $m`)
//! to the `UPDATE ... WHERE id = $1` clause. Zero affected rows means the
//! condition no longer held.

use super::{PipelineStore, TaskStore};
use crate::error::{PressroomError, PressroomResult};
use crate::models::{
    Pagination, Pipeline, StageRef, Task, TaskFilter, TaskPriority, TaskSort, TaskUpdate,
    UpdateCondition,
};
use crate::state_machine::TaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};
use uuid::Uuid;

const SCHEMA: &str = include_str!("sql/schema.sql");

/// Create tables and indexes if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> PressroomResult<()> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    Ok(())
}

#[derive(Debug, FromRow)]
struct TaskRow {
    id: Uuid,
    task_type: String,
    input_data: Value,
    output_data: Option<Value>,
    status: String,
    priority: i16,
    estimated_cost: f64,
    actual_cost: Option<f64>,
    quality_score: Option<f64>,
    error_message: Option<String>,
    retry_count: i32,
    max_retries: i32,
    scheduled_at: Option<DateTime<Utc>>,
    next_retry_at: Option<DateTime<Utc>>,
    timeout_ms: i64,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    pipeline_id: Option<Uuid>,
    pipeline_stage: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = PressroomError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<TaskState>()
            .map_err(PressroomError::SerializationError)?;
        let priority = TaskPriority::from_rank(row.priority).ok_or_else(|| {
            PressroomError::SerializationError(format!("Invalid priority rank: {}", row.priority))
        })?;
        let stage_ref = match (row.pipeline_id, row.pipeline_stage) {
            (Some(pipeline_id), Some(stage)) => Some(StageRef {
                pipeline_id,
                stage: stage.parse().map_err(PressroomError::SerializationError)?,
            }),
            _ => None,
        };

        Ok(Task {
            id: row.id,
            task_type: row.task_type,
            input_data: row.input_data,
            output_data: row.output_data,
            status,
            priority,
            estimated_cost: row.estimated_cost,
            actual_cost: row.actual_cost,
            quality_score: row.quality_score,
            error_message: row.error_message,
            retry_count: row.retry_count.max(0) as u32,
            max_retries: row.max_retries.max(0) as u32,
            scheduled_at: row.scheduled_at,
            next_retry_at: row.next_retry_at,
            timeout_ms: row.timeout_ms.max(0) as u64,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            stage_ref,
        })
    }
}

fn status_names(statuses: &[TaskState]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

/// Append a `SET`/`,` separator and `column = `.
fn push_assignment(query: &mut QueryBuilder<'_, Postgres>, assigned: &mut bool, column: &str) {
    query.push(if *assigned { ", " } else { " SET " });
    query.push(column);
    query.push(" = ");
    *assigned = true;
}

/// Append SET assignments for every populated field; returns false if none were.
fn push_assignments(query: &mut QueryBuilder<'_, Postgres>, update: &TaskUpdate) -> bool {
    let mut assigned = false;

    if let Some(status) = update.status {
        push_assignment(query, &mut assigned, "status");
        query.push_bind(status.as_str().to_string());
    }
    if let Some(output) = &update.output_data {
        push_assignment(query, &mut assigned, "output_data");
        query.push_bind(output.clone());
    }
    if let Some(cost) = update.actual_cost {
        push_assignment(query, &mut assigned, "actual_cost");
        query.push_bind(cost);
    }
    if let Some(score) = update.quality_score {
        push_assignment(query, &mut assigned, "quality_score");
        query.push_bind(score);
    }
    if let Some(message) = &update.error_message {
        push_assignment(query, &mut assigned, "error_message");
        query.push_bind(message.clone());
    }
    if let Some(retry_count) = update.retry_count {
        push_assignment(query, &mut assigned, "retry_count");
        query.push_bind(retry_count as i32);
    }
    if let Some(at) = update.next_retry_at {
        push_assignment(query, &mut assigned, "next_retry_at");
        query.push_bind(at);
    }
    if let Some(at) = update.started_at {
        push_assignment(query, &mut assigned, "started_at");
        query.push_bind(at);
    }
    if let Some(at) = update.completed_at {
        push_assignment(query, &mut assigned, "completed_at");
        query.push_bind(at);
    }
    assigned
}

fn push_filter(query: &mut QueryBuilder<'_, Postgres>, filter: &TaskFilter) {
    query.push(" WHERE TRUE");
    if let Some(statuses) = &filter.statuses {
        query.push(" AND status = ANY(");
        query.push_bind(status_names(statuses));
        query.push(")");
    }
    if let Some(task_type) = &filter.task_type {
        query.push(" AND task_type = ");
        query.push_bind(task_type.clone());
    }
    if let Some(priority) = filter.priority {
        query.push(" AND priority = ");
        query.push_bind(priority.rank());
    }
    if let Some(pipeline_id) = filter.pipeline_id {
        query.push(" AND pipeline_id = ");
        query.push_bind(pipeline_id);
    }
    if let Some(after) = filter.created_after {
        query.push(" AND created_at > ");
        query.push_bind(after);
    }
    if let Some(before) = filter.created_before {
        query.push(" AND created_at < ");
        query.push_bind(before);
    }
    if let Some(after) = filter.completed_after {
        query.push(" AND completed_at > ");
        query.push_bind(after);
    }
    if let Some(before) = filter.completed_before {
        query.push(" AND completed_at < ");
        query.push_bind(before);
    }
    if let Some(due) = filter.retry_due_at {
        query.push(" AND next_retry_at <= ");
        query.push_bind(due);
    }
    if filter.exclude_pending_retry {
        query.push(" AND next_retry_at IS NULL");
    }
}

fn order_clause(sort: TaskSort) -> &'static str {
    match sort {
        TaskSort::PriorityThenCreated => " ORDER BY priority DESC, created_at ASC, id ASC",
        TaskSort::CreatedAsc => " ORDER BY created_at ASC",
        TaskSort::CreatedDesc => " ORDER BY created_at DESC",
    }
}

#[derive(Debug, Clone)]
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    #[instrument(skip(self, task), fields(task_id = %task.id, task_type = %task.task_type))]
    async fn insert(&self, task: Task) -> PressroomResult<Task> {
        sqlx::query(
            r#"
            INSERT INTO pressroom_tasks (
                id, task_type, input_data, output_data, status, priority,
                estimated_cost, actual_cost, quality_score, error_message,
                retry_count, max_retries, scheduled_at, next_retry_at, timeout_ms,
                created_at, started_at, completed_at, pipeline_id, pipeline_stage
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
        )
        .bind(task.id)
        .bind(&task.task_type)
        .bind(&task.input_data)
        .bind(&task.output_data)
        .bind(task.status.as_str())
        .bind(task.priority.rank())
        .bind(task.estimated_cost)
        .bind(task.actual_cost)
        .bind(task.quality_score)
        .bind(&task.error_message)
        .bind(task.retry_count as i32)
        .bind(task.max_retries as i32)
        .bind(task.scheduled_at)
        .bind(task.next_retry_at)
        .bind(task.timeout_ms.min(i64::MAX as u64) as i64)
        .bind(task.created_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.stage_ref.map(|r| r.pipeline_id))
        .bind(task.stage_ref.map(|r| r.stage.as_str()))
        .execute(&self.pool)
        .await?;

        Ok(task)
    }

    async fn find_by_id(&self, id: Uuid) -> PressroomResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>("SELECT * FROM pressroom_tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Task::try_from).transpose()
    }

    async fn update_fields(&self, id: Uuid, update: &TaskUpdate) -> PressroomResult<Option<Task>> {
        self.update_if(id, &UpdateCondition::status_in(&TaskState::ALL), update)
            .await
    }

    #[instrument(skip(self, condition, update), fields(task_id = %id))]
    async fn update_if(
        &self,
        id: Uuid,
        condition: &UpdateCondition,
        update: &TaskUpdate,
    ) -> PressroomResult<Option<Task>> {
        let mut query = QueryBuilder::<Postgres>::new("UPDATE pressroom_tasks");
        if !push_assignments(&mut query, update) {
            // Nothing to write; report the current row if it satisfies the condition.
            return Ok(self
                .find_by_id(id)
                .await?
                .filter(|task| condition.admits(task)));
        }

        query.push(" WHERE id = ");
        query.push_bind(id);
        query.push(" AND status = ANY(");
        query.push_bind(status_names(&condition.statuses));
        query.push(")");
        if let Some(retry_count) = condition.retry_count {
            query.push(" AND retry_count = ");
            query.push_bind(retry_count as i32);
        }
        query.push(" RETURNING *");

        let row = query
            .build_query_as::<TaskRow>()
            .fetch_optional(&self.pool)
            .await?;
        if row.is_none() {
            debug!("Conditional update did not match");
        }
        row.map(Task::try_from).transpose()
    }

    async fn find_many(
        &self,
        filter: &TaskFilter,
        sort: TaskSort,
        page: Pagination,
    ) -> PressroomResult<Vec<Task>> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT * FROM pressroom_tasks");
        push_filter(&mut query, filter);
        query.push(order_clause(sort));
        query.push(" LIMIT ");
        query.push_bind(page.limit as i64);
        query.push(" OFFSET ");
        query.push_bind(page.offset as i64);

        let rows = query
            .build_query_as::<TaskRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn count(&self, filter: &TaskFilter) -> PressroomResult<u64> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM pressroom_tasks");
        push_filter(&mut query, filter);

        let (count,): (i64,) = query.build_query_as().fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }

    async fn delete(&self, id: Uuid) -> PressroomResult<bool> {
        let result = sqlx::query("DELETE FROM pressroom_tasks WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn claim_ready(&self, limit: usize, now: DateTime<Utc>) -> PressroomResult<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            WITH ready AS (
                SELECT id FROM pressroom_tasks
                WHERE status = 'QUEUED'
                  AND (scheduled_at IS NULL OR scheduled_at <= $1)
                ORDER BY priority DESC, created_at ASC, id ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE pressroom_tasks t
            SET status = 'PROCESSING', started_at = $1
            FROM ready
            WHERE t.id = ready.id
            RETURNING t.*
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut claimed = rows
            .into_iter()
            .map(Task::try_from)
            .collect::<PressroomResult<Vec<_>>>()?;
        claimed.sort_by(|a, b| TaskSort::PriorityThenCreated.compare(a, b));
        Ok(claimed)
    }
}

#[derive(Debug, FromRow)]
struct PipelineRow {
    document: Json<Pipeline>,
}

/// Pipelines stored as JSONB documents with the active flag denormalized for
/// the admission count.
#[derive(Debug, Clone)]
pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn insert(&self, pipeline: Pipeline) -> PressroomResult<Pipeline> {
        sqlx::query(
            r#"
            INSERT INTO pressroom_pipelines (id, overall_status, is_active, started_at, document)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(pipeline.id)
        .bind(pipeline.overall_status.as_str())
        .bind(pipeline.is_active())
        .bind(pipeline.started_at)
        .bind(Json(&pipeline))
        .execute(&self.pool)
        .await?;
        Ok(pipeline)
    }

    async fn find_by_id(&self, id: Uuid) -> PressroomResult<Option<Pipeline>> {
        let row = sqlx::query_as::<_, PipelineRow>(
            "SELECT document FROM pressroom_pipelines WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.document.0))
    }

    async fn save(&self, pipeline: &Pipeline) -> PressroomResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pressroom_pipelines
            SET overall_status = $2, is_active = $3, document = $4
            WHERE id = $1
            "#,
        )
        .bind(pipeline.id)
        .bind(pipeline.overall_status.as_str())
        .bind(pipeline.is_active())
        .bind(Json(pipeline))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PressroomError::not_found("pipeline", pipeline.id));
        }
        Ok(())
    }

    async fn list(&self, active_only: bool) -> PressroomResult<Vec<Pipeline>> {
        let rows = sqlx::query_as::<_, PipelineRow>(
            r#"
            SELECT document FROM pressroom_pipelines
            WHERE ($1 = FALSE OR is_active)
            ORDER BY started_at ASC
            "#,
        )
        .bind(active_only)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.document.0).collect())
    }

    async fn count_active(&self) -> PressroomResult<usize> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM pressroom_pipelines WHERE is_active")
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as usize)
    }
}
