//! HTTP front door.
//!
//! Thin axum handlers over the service layer: envelopes and status codes
//! only, no business rules.

pub mod prompts;
pub mod runners;
pub mod sessions;
pub mod tasks;
pub mod webhooks;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;

use crate::domain::errors::DomainError;
use crate::domain::ports::{RunnerRepository, TaskRepository};
use crate::services::{Dispatcher, FlCoordinator, PromptQueue, WebhookHub};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub hub: Arc<WebhookHub>,
    pub prompt_queue: Arc<PromptQueue>,
    pub federated: Arc<FlCoordinator>,
    pub tasks: Arc<dyn TaskRepository>,
    pub runners: Arc<dyn RunnerRepository>,
}

/// Domain error carried through a handler.
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DomainError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            DomainError::TaskNotFound(_)
            | DomainError::RunnerNotFound(_)
            | DomainError::PromptNotFound(_)
            | DomainError::SessionNotFound(_)
            | DomainError::RoundNotFound(_) => StatusCode::NOT_FOUND,
            DomainError::Conflict(_) | DomainError::InvalidStateTransition { .. } => {
                StatusCode::CONFLICT
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Build the full route tree, mounted under `endpoint`.
pub fn router(state: AppState, endpoint: &str) -> Router {
    let api = Router::new()
        .route("/tasks", post(tasks::create_task).get(tasks::list_tasks))
        .route("/tasks/:id", get(tasks::get_task))
        .route("/tasks/:id/result", post(tasks::submit_result).get(tasks::get_task_result))
        .route("/tasks/:id/reward", get(tasks::get_task_reward))
        .route("/tasks/:id/assign", post(tasks::assign_task))
        .route("/runners", get(runners::list_runners))
        .route("/runners/heartbeat", post(runners::heartbeat))
        .route("/runners/:device_id", get(runners::get_runner))
        .route("/webhooks", post(webhooks::register))
        .route("/webhooks/:id", delete(webhooks::unregister))
        .route("/llm/prompts", post(prompts::submit_prompt))
        .route("/llm/prompts/:id", get(prompts::get_prompt))
        .route("/llm/prompts/:id/complete", post(prompts::complete_prompt))
        .route("/fl/sessions", post(sessions::create_session).get(sessions::list_sessions))
        .route("/fl/sessions/:id", get(sessions::get_session))
        .route("/fl/sessions/:id/start", post(sessions::start_session))
        .route("/fl/sessions/:id/updates", post(sessions::submit_update))
        .route("/fl/sessions/:id/model", get(sessions::get_model))
        .with_state(state);

    if endpoint.is_empty() || endpoint == "/" {
        api
    } else {
        Router::new().nest(endpoint, api)
    }
}
