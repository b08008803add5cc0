//! Task routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::{ResourceUsage, Task, TaskEnvironment, TaskResult, TaskStatus, TaskType};

use super::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub config: Option<Value>,
    #[serde(default)]
    pub environment: Option<TaskEnvironment>,
    #[serde(default)]
    pub creator_address: String,
    #[serde(default)]
    pub creator_device_id: String,
    #[serde(default)]
    pub image_hash: String,
    #[serde(default)]
    pub command_hash: String,
}

pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let task_type = TaskType::from_str(&request.task_type).ok_or_else(|| {
        ApiError(DomainError::ValidationFailed(format!(
            "unknown task type: {}",
            request.task_type
        )))
    })?;

    let mut task = Task::new(task_type, request.title)
        .with_description(request.description)
        .with_creator(request.creator_address, request.creator_device_id);
    if let Some(config) = request.config {
        task = task.with_config(config);
    }
    if let Some(environment) = request.environment {
        task = task.with_environment(environment);
    }
    task.image_hash = request.image_hash;
    task.command_hash = request.command_hash;

    let created = state.dispatcher.create_task(task).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let tasks = match query.status.as_deref() {
        Some(raw) => {
            let status = TaskStatus::from_str(raw).ok_or_else(|| {
                ApiError(DomainError::ValidationFailed(format!("unknown status: {raw}")))
            })?;
            state.tasks.list_by_status(status).await?
        }
        None => state.tasks.list().await?,
    };
    Ok(Json(tasks))
}

pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Task>> {
    let task = state
        .tasks
        .get(id)
        .await?
        .ok_or(DomainError::TaskNotFound(id))?;
    Ok(Json(task))
}

pub async fn get_task_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TaskResult>> {
    let result = state
        .tasks
        .get_result(id)
        .await?
        .ok_or(DomainError::TaskNotFound(id))?;
    Ok(Json(result))
}

pub async fn get_task_reward(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let task = state
        .tasks
        .get(id)
        .await?
        .ok_or(DomainError::TaskNotFound(id))?;
    Ok(Json(json!({ "task_id": task.id, "reward": task.reward })))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub device_id: String,
}

pub async fn assign_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<AssignRequest>,
) -> ApiResult<StatusCode> {
    state.dispatcher.assign_task(id, &request.device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SubmitResultRequest {
    pub device_id: String,
    pub device_id_hash: String,
    pub solver_device_id: String,
    pub nonce: String,
    pub runner_address: String,
    pub creator_address: String,
    pub output: String,
    pub error: String,
    pub exit_code: i64,
    pub execution_time_ms: i64,
    pub resource_usage: ResourceUsage,
}

pub async fn submit_result(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitResultRequest>,
) -> ApiResult<StatusCode> {
    let mut result = TaskResult::new(id, request.device_id);
    result.device_id_hash = request.device_id_hash;
    result.solver_device_id = request.solver_device_id;
    result.nonce = request.nonce;
    result.runner_address = request.runner_address;
    result.creator_address = request.creator_address;
    result.output = request.output;
    result.error = request.error;
    result.exit_code = request.exit_code;
    result.execution_time_ms = request.execution_time_ms;
    result.resource_usage = request.resource_usage;

    state.dispatcher.save_result(result).await?;
    Ok(StatusCode::NO_CONTENT)
}
