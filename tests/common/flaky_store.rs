//! Task store wrapper that can be switched into an outage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pressroom_core::error::{PressroomError, PressroomResult};
use pressroom_core::models::{Pagination, Task, TaskFilter, TaskSort, TaskUpdate, UpdateCondition};
use pressroom_core::store::{InMemoryTaskStore, TaskStore};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use uuid::Uuid;

#[derive(Default)]
pub struct FlakyTaskStore {
    pub inner: InMemoryTaskStore,
    unavailable: AtomicBool,
    pub rejected_calls: AtomicU32,
}

impl FlakyTaskStore {
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> PressroomResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            self.rejected_calls.fetch_add(1, Ordering::SeqCst);
            Err(PressroomError::StoreUnavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl TaskStore for FlakyTaskStore {
    async fn insert(&self, task: Task) -> PressroomResult<Task> {
        self.check()?;
        self.inner.insert(task).await
    }

    async fn find_by_id(&self, id: Uuid) -> PressroomResult<Option<Task>> {
        self.check()?;
        self.inner.find_by_id(id).await
    }

    async fn update_fields(&self, id: Uuid, update: &TaskUpdate) -> PressroomResult<Option<Task>> {
        self.check()?;
        self.inner.update_fields(id, update).await
    }

    async fn update_if(
        &self,
        id: Uuid,
        condition: &UpdateCondition,
        update: &TaskUpdate,
    ) -> PressroomResult<Option<Task>> {
        self.check()?;
        self.inner.update_if(id, condition, update).await
    }

    async fn find_many(
        &self,
        filter: &TaskFilter,
        sort: TaskSort,
        page: Pagination,
    ) -> PressroomResult<Vec<Task>> {
        self.check()?;
        self.inner.find_many(filter, sort, page).await
    }

    async fn count(&self, filter: &TaskFilter) -> PressroomResult<u64> {
        self.check()?;
        self.inner.count(filter).await
    }

    async fn delete(&self, id: Uuid) -> PressroomResult<bool> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn claim_ready(&self, limit: usize, now: DateTime<Utc>) -> PressroomResult<Vec<Task>> {
        self.check()?;
        self.inner.claim_ready(limit, now).await
    }
}
