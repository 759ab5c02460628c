//! Axum Handlers for the REST API
//!
//! This module maps the pipeline's entry points onto HTTP: submission is
//! fire-and-forget (the run is spawned onto the runtime), status is
//! pollable at any time, and the full result is only served once the
//! objective is terminal.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use mentor_core::{CoordinatorError, PlanningError};
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::{
    models::{
        ErrorResponse, ObjectiveView, ResultResponse, StatusResponse, SubmitPayload,
        SubmittedResponse, UsageResponse,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Planning(PlanningError::InvalidInput(message)) => {
                ApiError::BadRequest(message)
            }
            CoordinatorError::UnknownObjective(id) => {
                ApiError::NotFound(format!("Objective with id '{id}' not found"))
            }
            CoordinatorError::NotFinished(id) => {
                ApiError::Conflict(format!("Objective '{id}' has not finished generating"))
            }
            other => ApiError::InternalServerError(anyhow::Error::new(other)),
        }
    }
}

/// Submit a topic for content generation.
#[utoipa::path(
    post,
    path = "/objectives",
    request_body = SubmitPayload,
    responses(
        (status = 202, description = "Objective accepted for generation", body = SubmittedResponse),
        (status = 400, description = "Invalid topic", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn submit_objective(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SubmitPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.coordinator.submit(&payload.topic).await?;

    // Fire-and-forget: the caller polls status while generation proceeds.
    let coordinator = Arc::clone(&state.coordinator);
    tokio::spawn(async move {
        if let Err(err) = coordinator.run(id).await {
            error!(%id, error = %err, "generation run failed");
        }
    });

    Ok((StatusCode::ACCEPTED, Json(SubmittedResponse { id })))
}

/// List all learning objectives.
#[utoipa::path(
    get,
    path = "/objectives",
    responses(
        (status = 200, description = "All objectives, most recent first", body = [ObjectiveView]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    )
)]
pub async fn list_objectives(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ObjectiveView>>, ApiError> {
    let objectives = state.coordinator.list().await?;
    Ok(Json(objectives.iter().map(ObjectiveView::from).collect()))
}

/// Poll the generation status of an objective.
#[utoipa::path(
    get,
    path = "/objectives/{id}/status",
    responses(
        (status = 200, description = "Current status with per-component detail", body = StatusResponse),
        (status = 404, description = "Objective not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Objective ID")
    )
)]
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, ApiError> {
    let report = state.coordinator.status(id).await?;
    Ok(Json(report.into()))
}

/// Fetch the finished result of an objective.
#[utoipa::path(
    get,
    path = "/objectives/{id}",
    responses(
        (status = 200, description = "The finished objective with components and checks", body = ResultResponse),
        (status = 404, description = "Objective not found", body = ErrorResponse),
        (status = 409, description = "Objective has not finished", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Objective ID")
    )
)]
pub async fn get_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResultResponse>, ApiError> {
    let result = state.coordinator.result(id).await?;
    Ok(Json(result.into()))
}

/// Read the budget ledger's current spend and headroom.
#[utoipa::path(
    get,
    path = "/usage",
    responses(
        (status = 200, description = "Current budget usage", body = UsageResponse)
    )
)]
pub async fn get_usage(State(state): State<Arc<AppState>>) -> Json<UsageResponse> {
    Json(state.budget.usage_summary().await.into())
}
