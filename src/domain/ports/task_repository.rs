//! Task store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{Task, TaskResult, TaskStatus};

/// Repository interface for Task persistence.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Create a new task.
    async fn create(&self, task: &Task) -> DomainResult<()>;

    /// Get a task by ID.
    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>>;

    /// Update an existing task.
    async fn update(&self, task: &Task) -> DomainResult<()>;

    /// Delete a task; its results cascade.
    async fn delete(&self, id: Uuid) -> DomainResult<()>;

    /// List all tasks, newest first.
    async fn list(&self) -> DomainResult<Vec<Task>>;

    /// List tasks in a status, oldest first. The pending sweep relies on
    /// this ordering.
    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>>;

    /// List running tasks whose `updated_at` is older than the cutoff.
    async fn list_stalled(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Task>>;

    /// Persist a result row.
    async fn save_result(&self, result: &TaskResult) -> DomainResult<()>;

    /// Fetch the result for a task, if one was saved.
    async fn get_result(&self, task_id: Uuid) -> DomainResult<Option<TaskResult>>;
}
