//! Route definitions for the API server
//!
//! - `/health` and `/metrics` for monitoring
//! - `/api/v1/charging/authorize` for admission
//! - `/api/v1/status` for the operator snapshot
//! - `/api-docs` for the OpenAPI document and Swagger UI

use crate::{handlers, middleware, state::AppState};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation configuration
#[derive(OpenApi)]
#[openapi(
    info(
        title = "VoltGate Authorization API",
        version = "1.0.0",
        description = "Admission API for asynchronous EV charging authorization",
        license(name = "MIT OR Apache-2.0")
    ),
    paths(
        handlers::authorize_charging,
        handlers::health_check,
        handlers::metrics,
        handlers::status,
    ),
    components(
        schemas(
            crate::models::AuthorizeChargingRequest,
            crate::models::AuthorizeChargingResponse,
            crate::models::ErrorResponse,
        )
    ),
    tags(
        (name = "charging", description = "Charging authorization admission"),
        (name = "health", description = "Health, metrics and status endpoints"),
    )
)]
pub struct ApiDoc;

/// Build the application router with all routes and middleware
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/charging/authorize", post(handlers::authorize_charging))
        .route("/status", get(handlers::status));

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        .nest("/api/v1", api_routes)
        .merge(SwaggerUi::new("/api-docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        // Layers run bottom to top
        .layer(axum_middleware::from_fn(middleware::logging_middleware))
        .layer(axum_middleware::from_fn(middleware::request_id_middleware))
        .layer(middleware::cors_layer())
        .layer(TraceLayer::new_for_http())
}
