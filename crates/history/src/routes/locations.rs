use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use geotrail_domain::error::DomainError;
use geotrail_domain::jobs::now_ms;
use geotrail_domain::locations::{LocationPing, TimeWindow, validate_username};
use geotrail_domain::recording::RecordOutcome;
use geotrail_domain::travel::DISTANCE_UNIT;
use geotrail_domain::util::{format_ms_rfc3339, parse_rfc3339_ms};
use geotrail_infra::http::error::{ApiError, map_domain_error};
use geotrail_infra::wire::{
    RecordPingRequest, RecordPingResponse, TravelDistanceQuery, TravelDistanceResponse,
};

use crate::observability::{
    self, RECORD_CONFLICT, RECORD_DUPLICATE, RECORD_FAILED, RECORD_REJECTED, RECORD_STORED,
};
use crate::state::AppState;

type RecordReply = (StatusCode, Json<RecordPingResponse>);

/// Replies with the `{status, error}` body the management client expects,
/// including on failure.
pub async fn record_ping(
    State(state): State<AppState>,
    payload: Result<Json<RecordPingRequest>, JsonRejection>,
) -> RecordReply {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return rejected(rejection.body_text()),
    };
    let recorded_at_ms = match parse_rfc3339_ms("timestamp", &request.timestamp) {
        Ok(recorded_at_ms) => recorded_at_ms,
        Err(err) => return rejected(err.to_string()),
    };
    let ping = match LocationPing::new(
        request.username,
        request.latitude,
        request.longitude,
        recorded_at_ms,
    ) {
        Ok(ping) => ping,
        Err(err) => return rejected(err.to_string()),
    };

    match state.recorder.record(ping).await {
        Ok(RecordOutcome::Stored) => {
            observability::register_record_outcome(RECORD_STORED);
            (StatusCode::OK, Json(RecordPingResponse::success()))
        }
        Ok(RecordOutcome::AlreadyStored) => {
            observability::register_record_outcome(RECORD_DUPLICATE);
            (StatusCode::OK, Json(RecordPingResponse::success()))
        }
        Err(DomainError::Validation(message)) => rejected(message),
        Err(DomainError::Conflict(message)) => {
            observability::register_record_outcome(RECORD_CONFLICT);
            (
                StatusCode::CONFLICT,
                Json(RecordPingResponse::failed(message)),
            )
        }
        Err(err) => {
            observability::register_record_outcome(RECORD_FAILED);
            tracing::error!(error = %err, "failed to record ping");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(RecordPingResponse::failed(err.to_string())),
            )
        }
    }
}

fn rejected(message: String) -> RecordReply {
    observability::register_record_outcome(RECORD_REJECTED);
    (
        StatusCode::BAD_REQUEST,
        Json(RecordPingResponse::failed(message)),
    )
}

pub async fn travel_distance(
    State(state): State<AppState>,
    query: Result<Query<TravelDistanceQuery>, QueryRejection>,
) -> Result<Json<TravelDistanceResponse>, ApiError> {
    let Query(query) = query.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    validate_username(&query.username).map_err(map_domain_error)?;
    let start_ms = optional_timestamp("start", query.start.as_deref())?;
    let end_ms = optional_timestamp("end", query.end.as_deref())?;
    let window = TimeWindow::resolve(start_ms, end_ms, now_ms()).map_err(map_domain_error)?;

    let distance = state
        .travel
        .travel_distance(&query.username, window)
        .await
        .map_err(map_domain_error)?;
    observability::register_travel_query(distance.point_count);

    Ok(Json(TravelDistanceResponse {
        username: distance.username,
        distance: distance.total_km,
        unit: DISTANCE_UNIT.to_string(),
        start: format_ms_rfc3339(distance.window.start_ms).map_err(map_domain_error)?,
        end: format_ms_rfc3339(distance.window.end_ms).map_err(map_domain_error)?,
        point_count: distance.point_count,
    }))
}

fn optional_timestamp(field: &str, value: Option<&str>) -> Result<Option<i64>, ApiError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_rfc3339_ms(field, value)
            .map(Some)
            .map_err(map_domain_error),
        None => Ok(None),
    }
}
