mod locations;

use axum::extract::State;
use axum::response::Response;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use geotrail_infra::http::error::ApiError;
use geotrail_infra::http::{health_response, metrics_response, middleware as http_middleware};
use geotrail_infra::wire::{LOCATIONS_PATH, TRAVEL_DISTANCE_PATH};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route(LOCATIONS_PATH, post(locations::record_ping))
        .route(TRAVEL_DISTANCE_PATH, get(locations::travel_distance))
        .layer(middleware::from_fn(http_middleware::metrics_layer))
        .layer(http_middleware::timeout_layer(request_timeout))
        .layer(http_middleware::trace_layer())
        .layer(http_middleware::set_request_id_layer())
        .layer(http_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(
            http_middleware::correlation_id_middleware,
        ))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    health_response(&state.config, state.health.as_ref()).await
}

async fn metrics() -> Result<Response, ApiError> {
    metrics_response().await
}
