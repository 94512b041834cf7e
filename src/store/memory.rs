//! In-process stores. Every operation takes the map lock once, so conditional
//! updates and claims are atomic with respect to each other.

use super::{PipelineStore, TaskStore};
use crate::error::{PressroomError, PressroomResult};
use crate::models::{
    Pagination, Pipeline, Task, TaskFilter, TaskSort, TaskUpdate, UpdateCondition,
};
use crate::state_machine::TaskState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, Task>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> PressroomResult<Task> {
        let mut tasks = self.tasks.write();
        if tasks.contains_key(&task.id) {
            return Err(PressroomError::ValidationError(format!(
                "task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn find_by_id(&self, id: Uuid) -> PressroomResult<Option<Task>> {
        Ok(self.tasks.read().get(&id).cloned())
    }

    async fn update_fields(&self, id: Uuid, update: &TaskUpdate) -> PressroomResult<Option<Task>> {
        let mut tasks = self.tasks.write();
        Ok(tasks.get_mut(&id).map(|task| {
            update.apply(task);
            task.clone()
        }))
    }

    async fn update_if(
        &self,
        id: Uuid,
        condition: &UpdateCondition,
        update: &TaskUpdate,
    ) -> PressroomResult<Option<Task>> {
        let mut tasks = self.tasks.write();
        match tasks.get_mut(&id) {
            Some(task) if condition.admits(task) => {
                update.apply(task);
                Ok(Some(task.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn find_many(
        &self,
        filter: &TaskFilter,
        sort: TaskSort,
        page: Pagination,
    ) -> PressroomResult<Vec<Task>> {
        let tasks = self.tasks.read();
        let mut matching: Vec<&Task> = tasks.values().filter(|t| filter.matches(t)).collect();
        matching.sort_by(|a, b| sort.compare(a, b));

        Ok(matching
            .into_iter()
            .skip(page.offset)
            .take(page.limit)
            .cloned()
            .collect())
    }

    async fn count(&self, filter: &TaskFilter) -> PressroomResult<u64> {
        let tasks = self.tasks.read();
        Ok(tasks.values().filter(|t| filter.matches(t)).count() as u64)
    }

    async fn delete(&self, id: Uuid) -> PressroomResult<bool> {
        Ok(self.tasks.write().remove(&id).is_some())
    }

    async fn claim_ready(&self, limit: usize, now: DateTime<Utc>) -> PressroomResult<Vec<Task>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tasks = self.tasks.write();
        let mut ready: Vec<&Task> = tasks.values().filter(|t| t.is_ready(now)).collect();
        ready.sort_by(|a, b| TaskSort::PriorityThenCreated.compare(a, b));
        let ids: Vec<Uuid> = ready.into_iter().take(limit).map(|t| t.id).collect();

        let claim = TaskUpdate {
            status: Some(TaskState::Processing),
            started_at: Some(Some(now)),
            ..Default::default()
        };

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(task) = tasks.get_mut(&id) {
                claim.apply(task);
                claimed.push(task.clone());
            }
        }
        Ok(claimed)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryPipelineStore {
    pipelines: RwLock<HashMap<Uuid, Pipeline>>,
}

impl InMemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PipelineStore for InMemoryPipelineStore {
    async fn insert(&self, pipeline: Pipeline) -> PressroomResult<Pipeline> {
        self.pipelines.write().insert(pipeline.id, pipeline.clone());
        Ok(pipeline)
    }

    async fn find_by_id(&self, id: Uuid) -> PressroomResult<Option<Pipeline>> {
        Ok(self.pipelines.read().get(&id).cloned())
    }

    async fn save(&self, pipeline: &Pipeline) -> PressroomResult<()> {
        let mut pipelines = self.pipelines.write();
        match pipelines.get_mut(&pipeline.id) {
            Some(stored) => {
                *stored = pipeline.clone();
                Ok(())
            }
            None => Err(PressroomError::not_found("pipeline", pipeline.id)),
        }
    }

    async fn list(&self, active_only: bool) -> PressroomResult<Vec<Pipeline>> {
        let pipelines = self.pipelines.read();
        let mut listed: Vec<Pipeline> = pipelines
            .values()
            .filter(|p| !active_only || p.is_active())
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(listed)
    }

    async fn count_active(&self) -> PressroomResult<usize> {
        Ok(self.pipelines.read().values().filter(|p| p.is_active()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewTask, TaskPriority};
    use chrono::Duration;
    use serde_json::json;
    use std::sync::Arc;

    fn queued(priority: TaskPriority, created_at: DateTime<Utc>) -> Task {
        Task::from_new(
            NewTask::new("generate", json!({})).with_priority(priority),
            1_000,
            3,
            0.0,
            created_at,
        )
    }

    #[tokio::test]
    async fn claim_takes_highest_priority_first() {
        let store = InMemoryTaskStore::new();
        let t0 = Utc::now() - Duration::seconds(10);
        let low = store.insert(queued(TaskPriority::Low, t0)).await.unwrap();
        let urgent = store
            .insert(queued(TaskPriority::Urgent, t0 + Duration::seconds(1)))
            .await
            .unwrap();

        let claimed = store.claim_ready(1, Utc::now()).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].id, urgent.id);
        assert_eq!(claimed[0].status, TaskState::Processing);

        let untouched = store.find_by_id(low.id).await.unwrap().unwrap();
        assert_eq!(untouched.status, TaskState::Queued);
    }

    #[tokio::test]
    async fn claim_skips_future_scheduled_tasks() {
        let store = InMemoryTaskStore::new();
        let now = Utc::now();
        let mut later = queued(TaskPriority::Urgent, now);
        later.scheduled_at = Some(now + Duration::hours(1));
        store.insert(later).await.unwrap();

        assert!(store.claim_ready(10, now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_task() {
        let store = Arc::new(InMemoryTaskStore::new());
        for _ in 0..50 {
            store
                .insert(queued(TaskPriority::Normal, Utc::now()))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim_ready(10, Utc::now()).await.unwrap()
            }));
        }

        let mut seen = std::collections::HashSet::new();
        for handle in handles {
            for task in handle.await.unwrap() {
                assert!(seen.insert(task.id), "task {} claimed twice", task.id);
            }
        }
        assert_eq!(seen.len(), 50);
    }

    #[tokio::test]
    async fn update_if_rejects_stale_condition() {
        let store = InMemoryTaskStore::new();
        let task = store
            .insert(queued(TaskPriority::Normal, Utc::now()))
            .await
            .unwrap();

        let cancel = TaskUpdate {
            status: Some(TaskState::Cancelled),
            ..Default::default()
        };
        let from_processing = UpdateCondition::status_in(&[TaskState::Processing]);
        assert!(store
            .update_if(task.id, &from_processing, &cancel)
            .await
            .unwrap()
            .is_none());

        let from_queued = UpdateCondition::status_in(&[TaskState::Queued]);
        let updated = store
            .update_if(task.id, &from_queued, &cancel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn find_many_paginates_after_sorting() {
        let store = InMemoryTaskStore::new();
        let t0 = Utc::now();
        for i in 0..5 {
            store
                .insert(queued(TaskPriority::Normal, t0 + Duration::seconds(i)))
                .await
                .unwrap();
        }

        let page = store
            .find_many(&TaskFilter::default(), TaskSort::CreatedAsc, Pagination::new(2, 2))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].created_at, t0 + Duration::seconds(2));
        assert_eq!(store.count(&TaskFilter::default()).await.unwrap(), 5);
    }
}
