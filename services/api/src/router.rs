//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST API and OpenAPI documentation.

use crate::{
    handlers,
    models::{
        CheckView, ComponentStatusView, ComponentView, ErrorResponse, FailureView, ObjectiveView,
        ResultResponse, StatusResponse, SubmitPayload, SubmittedResponse, UsageResponse,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::get,
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::submit_objective,
        handlers::list_objectives,
        handlers::get_status,
        handlers::get_result,
        handlers::get_usage,
    ),
    components(
        schemas(
            SubmitPayload,
            SubmittedResponse,
            StatusResponse,
            ComponentStatusView,
            FailureView,
            ResultResponse,
            ObjectiveView,
            ComponentView,
            CheckView,
            UsageResponse,
            ErrorResponse
        )
    ),
    tags(
        (name = "Mentor API", description = "Structured learning-content generation")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route(
            "/objectives",
            get(handlers::list_objectives).post(handlers::submit_objective),
        )
        .route("/objectives/{id}", get(handlers::get_result))
        .route("/objectives/{id}/status", get(handlers::get_status))
        .route("/usage", get(handlers::get_usage))
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
