//! HTTP handlers for the admission API

use crate::{
    error::{ApiError, Result},
    models::{AuthorizeChargingRequest, AuthorizeChargingResponse},
    state::AppState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};
use validator::Validate;
use voltgate_authz::{HealthReport, StatusSnapshot};

/// Admit a charging authorization request
///
/// Validates the body, enqueues the request and returns immediately. The
/// decision is delivered later to `callback_url`.
#[utoipa::path(
    post,
    path = "/api/v1/charging/authorize",
    request_body = AuthorizeChargingRequest,
    responses(
        (status = 202, description = "Request accepted for processing", body = AuthorizeChargingResponse),
        (status = 400, description = "Invalid request body", body = ErrorResponse),
        (status = 503, description = "Queue is full", body = ErrorResponse),
    ),
    tag = "charging"
)]
pub async fn authorize_charging(
    State(state): State<Arc<AppState>>,
    payload: std::result::Result<Json<AuthorizeChargingRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AuthorizeChargingResponse>)> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    req.validate().map_err(|e| {
        warn!(station_id = %req.station_id, "Rejected authorization request: {}", e);
        ApiError::ValidationError(e.to_string())
    })?;

    let request = state
        .pipeline
        .submit(req.station_id, req.driver_token, req.callback_url)
        .await?;

    info!(
        request_id = %request.request_id,
        station_id = %request.station_id,
        "Authorization request accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(AuthorizeChargingResponse::accepted(request.request_id)),
    ))
}

/// Aggregated pipeline health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "All components are up"),
        (status = 503, description = "At least one component is degraded")
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let report = state.pipeline.health();
    let status = if report.status.is_up() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(report))
}

/// Prometheus text exposition
#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus metrics", content_type = "text/plain")
    ),
    tag = "health"
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let body = state
        .pipeline
        .export_prometheus()
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// Processor state, queue depth, counters and breaker stats
#[utoipa::path(
    get,
    path = "/api/v1/status",
    responses(
        (status = 200, description = "Pipeline status snapshot")
    ),
    tag = "health"
)]
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    Json(state.pipeline.snapshot())
}
