//! HTTP plumbing shared by the management and history services.

pub mod error;
pub mod middleware;
pub mod validation;

use axum::Json;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::config::AppConfig;
use crate::db::HealthProbe;
use crate::observability;
use error::ApiError;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
    datastore: &'static str,
}

/// `200 ok` when the datastore answers, `503 degraded` otherwise.
pub async fn health_response(config: &AppConfig, probe: &dyn HealthProbe) -> Response {
    let (status_code, status) = match probe.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            tracing::warn!(datastore = probe.name(), error = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };
    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        environment: config.app_env.clone(),
        datastore: probe.name(),
    };
    (status_code, Json(body)).into_response()
}

pub async fn metrics_response() -> Result<Response, ApiError> {
    let body = observability::render_metrics().ok_or(ApiError::NotFound)?;
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}
