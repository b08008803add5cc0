//! Federated-learning session routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use uuid::Uuid;

use crate::domain::models::{FlSession, RoundParticipant};
use crate::services::{CreateSessionRequest, SubmitUpdateRequest, TrainedModel};

use super::{ApiResult, AppState};

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<FlSession>)> {
    let session = state.federated.create_session(request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

pub async fn list_sessions(State(state): State<AppState>) -> ApiResult<Json<Vec<FlSession>>> {
    Ok(Json(state.federated.list_sessions().await?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<FlSession>> {
    Ok(Json(state.federated.get_session(id).await?))
}

pub async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<FlSession>> {
    Ok(Json(state.federated.start_session(id).await?))
}

pub async fn submit_update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<SubmitUpdateRequest>,
) -> ApiResult<Json<RoundParticipant>> {
    Ok(Json(state.federated.submit_model_update(id, request).await?))
}

pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TrainedModel>> {
    Ok(Json(state.federated.get_trained_model(id).await?))
}
