//! SQLite implementation of the TaskRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    ResourceUsage, Task, TaskEnvironment, TaskResult, TaskStatus, TaskType,
};
use crate::domain::ports::TaskRepository;

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> DomainResult<()> {
        let config_json = serde_json::to_string(&task.config)?;
        let environment_json = task
            .environment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO tasks (id, task_type, title, description, config, environment,
               status, reward, creator_address, creator_device_id, runner_id, nonce,
               image_hash, command_hash, created_at, updated_at, completed_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(task.task_type.as_str())
        .bind(&task.title)
        .bind(&task.description)
        .bind(&config_json)
        .bind(&environment_json)
        .bind(task.status.as_str())
        .bind(task.reward)
        .bind(&task.creator_address)
        .bind(&task.creator_device_id)
        .bind(&task.runner_id)
        .bind(&task.nonce)
        .bind(&task.image_hash)
        .bind(&task.command_hash)
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let config_json = serde_json::to_string(&task.config)?;
        let environment_json = task
            .environment
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE tasks SET task_type = ?, title = ?, description = ?, config = ?,
               environment = ?, status = ?, reward = ?, creator_address = ?,
               creator_device_id = ?, runner_id = ?, nonce = ?, image_hash = ?,
               command_hash = ?, updated_at = ?, completed_at = ?
               WHERE id = ?"#,
        )
        .bind(task.task_type.as_str())
        .bind(&task.title)
        .bind(&task.description)
        .bind(&config_json)
        .bind(&environment_json)
        .bind(task.status.as_str())
        .bind(task.reward)
        .bind(&task.creator_address)
        .bind(&task.creator_device_id)
        .bind(&task.runner_id)
        .bind(&task.nonce)
        .bind(&task.image_hash)
        .bind(&task.command_hash)
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(task.id));
        }

        Ok(())
    }

    async fn delete(&self, id: Uuid) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(id));
        }

        Ok(())
    }

    async fn list(&self) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as("SELECT * FROM tasks ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> =
            sqlx::query_as("SELECT * FROM tasks WHERE status = ? ORDER BY created_at ASC")
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_stalled(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE status = 'running' AND updated_at < ? ORDER BY updated_at ASC",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn save_result(&self, result: &TaskResult) -> DomainResult<()> {
        sqlx::query(
            r#"INSERT INTO task_results (id, task_id, device_id, device_id_hash,
               solver_device_id, nonce, runner_address, creator_address, output,
               error, exit_code, execution_time_ms, cpu_seconds, estimated_cycles,
               memory_gb_hours, storage_gb, network_gb, reward, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(result.id.to_string())
        .bind(result.task_id.to_string())
        .bind(&result.device_id)
        .bind(&result.device_id_hash)
        .bind(&result.solver_device_id)
        .bind(&result.nonce)
        .bind(&result.runner_address)
        .bind(&result.creator_address)
        .bind(&result.output)
        .bind(&result.error)
        .bind(result.exit_code)
        .bind(result.execution_time_ms)
        .bind(result.resource_usage.cpu_seconds)
        .bind(result.resource_usage.estimated_cycles as i64)
        .bind(result.resource_usage.memory_gb_hours)
        .bind(result.resource_usage.storage_gb)
        .bind(result.resource_usage.network_gb)
        .bind(result.reward)
        .bind(result.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_result(&self, task_id: Uuid) -> DomainResult<Option<TaskResult>> {
        let row: Option<ResultRow> = sqlx::query_as(
            "SELECT * FROM task_results WHERE task_id = ? ORDER BY created_at DESC LIMIT 1",
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    task_type: String,
    title: String,
    description: String,
    config: String,
    environment: Option<String>,
    status: String,
    reward: f64,
    creator_address: String,
    creator_device_id: String,
    runner_id: String,
    nonce: String,
    image_hash: String,
    command_hash: String,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let id = super::parse_uuid(&row.id)?;

        let task_type = TaskType::from_str(&row.task_type).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid task type: {}", row.task_type))
        })?;
        let status = TaskStatus::from_str(&row.status).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid status: {}", row.status))
        })?;

        let config = serde_json::from_str(&row.config)?;
        let environment: Option<TaskEnvironment> = row
            .environment
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Task {
            id,
            task_type,
            title: row.title,
            description: row.description,
            config,
            environment,
            status,
            reward: row.reward,
            creator_address: row.creator_address,
            creator_device_id: row.creator_device_id,
            runner_id: row.runner_id,
            nonce: row.nonce,
            image_hash: row.image_hash,
            command_hash: row.command_hash,
            created_at: super::parse_datetime(&row.created_at)?,
            updated_at: super::parse_datetime(&row.updated_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: String,
    task_id: String,
    device_id: String,
    device_id_hash: String,
    solver_device_id: String,
    nonce: String,
    runner_address: String,
    creator_address: String,
    output: String,
    error: String,
    exit_code: i64,
    execution_time_ms: i64,
    cpu_seconds: f64,
    estimated_cycles: i64,
    memory_gb_hours: f64,
    storage_gb: f64,
    network_gb: f64,
    reward: f64,
    created_at: String,
}

impl TryFrom<ResultRow> for TaskResult {
    type Error = DomainError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        Ok(TaskResult {
            id: super::parse_uuid(&row.id)?,
            task_id: super::parse_uuid(&row.task_id)?,
            device_id: row.device_id,
            device_id_hash: row.device_id_hash,
            solver_device_id: row.solver_device_id,
            nonce: row.nonce,
            runner_address: row.runner_address,
            creator_address: row.creator_address,
            output: row.output,
            error: row.error,
            exit_code: row.exit_code,
            execution_time_ms: row.execution_time_ms,
            resource_usage: ResourceUsage {
                cpu_seconds: row.cpu_seconds,
                estimated_cycles: row.estimated_cycles.max(0) as u64,
                memory_gb_hours: row.memory_gb_hours,
                storage_gb: row.storage_gb,
                network_gb: row.network_gb,
            },
            reward: row.reward,
            created_at: super::parse_datetime(&row.created_at)?,
        })
    }
}
