//! Runner registry routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

use crate::domain::errors::DomainError;
use crate::domain::models::{ModelCapability, Runner, RunnerStatus};

use super::{ApiError, ApiResult, AppState};

#[derive(Debug, Deserialize)]
pub struct HeartbeatRequest {
    pub device_id: String,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub webhook: String,
    #[serde(default)]
    pub capabilities: Vec<ModelCapability>,
}

/// Idempotent create-or-update. A runner coming back online wakes the
/// dispatcher so pending work reaches it without waiting for the sweep.
pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<StatusCode> {
    if request.device_id.trim().is_empty() {
        return Err(ApiError(DomainError::ValidationFailed(
            "device_id cannot be empty".to_string(),
        )));
    }

    let status = match request.status.as_deref() {
        None => RunnerStatus::Online,
        Some(raw) => RunnerStatus::from_str(raw).ok_or_else(|| {
            ApiError(DomainError::ValidationFailed(format!("unknown runner status: {raw}")))
        })?,
    };

    let mut runner = Runner::new(request.device_id);
    runner.wallet_address = request.wallet_address;
    runner.status = status;
    runner.webhook = request.webhook;
    runner.capabilities = request.capabilities;

    let outcome = state.runners.upsert_on_heartbeat(&runner).await?;

    if outcome.became_available {
        tracing::info!(device_id = %outcome.runner.device_id, "runner became available");
        state.dispatcher.wake();
        let dispatcher = state.dispatcher.clone();
        let device_id = outcome.runner.device_id.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatcher.backfill_from_runner(&device_id).await {
                tracing::warn!(device_id, error = %e, "backfill after heartbeat failed");
            }
        });
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_runners(State(state): State<AppState>) -> ApiResult<Json<Vec<Runner>>> {
    Ok(Json(state.runners.list().await?))
}

pub async fn get_runner(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> ApiResult<Json<Runner>> {
    let runner = state
        .runners
        .get(&device_id)
        .await?
        .ok_or(DomainError::RunnerNotFound(device_id))?;
    Ok(Json(runner))
}
