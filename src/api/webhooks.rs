//! Webhook subscription routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::domain::errors::DomainError;

use super::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub url: String,
    pub device_id: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if request.url.trim().is_empty() {
        return Err(ApiError(DomainError::ValidationFailed(
            "webhook url cannot be empty".to_string(),
        )));
    }

    let webhook_id = state.hub.register(request.url, request.device_id).await;
    Ok((StatusCode::CREATED, Json(json!({ "webhook_id": webhook_id }))))
}

pub async fn unregister(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if state.hub.unregister(id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError(DomainError::ValidationFailed(format!("unknown webhook id: {id}"))))
    }
}
