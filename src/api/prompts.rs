//! Inference prompt routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::domain::models::PromptRequest;

use super::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct SubmitPromptRequest {
    pub client_id: String,
    pub prompt: String,
    pub model: String,
}

pub async fn submit_prompt(
    State(state): State<AppState>,
    Json(request): Json<SubmitPromptRequest>,
) -> ApiResult<(StatusCode, Json<PromptRequest>)> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError(DomainError::ValidationFailed(
            "prompt cannot be empty".to_string(),
        )));
    }

    let prompt = state
        .prompt_queue
        .submit(request.client_id, request.prompt, request.model)
        .await?;
    Ok((StatusCode::CREATED, Json(prompt)))
}

pub async fn get_prompt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<PromptRequest>> {
    // Route through the queue's repository so handler and processor agree.
    let prompt = state
        .prompt_queue
        .get(id)
        .await?
        .ok_or(DomainError::PromptNotFound(id))?;
    Ok(Json(prompt))
}

#[derive(Debug, Deserialize)]
pub struct CompletePromptRequest {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub prompt_tokens: i64,
    #[serde(default)]
    pub response_tokens: i64,
    #[serde(default)]
    pub inference_time_ms: i64,
}

pub async fn complete_prompt(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<CompletePromptRequest>,
) -> ApiResult<Json<PromptRequest>> {
    let prompt = state
        .prompt_queue
        .complete(
            id,
            request.response,
            request.prompt_tokens,
            request.response_tokens,
            request.inference_time_ms,
        )
        .await?;
    Ok(Json(prompt))
}
