use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use geotrail_domain::error::DomainError;
use geotrail_domain::ingest::{IngestOutcome, PingInput};
use geotrail_domain::jobs::now_ms;
use geotrail_domain::locations::{TimeWindow, validate_username};
use geotrail_domain::proximity::{
    DEFAULT_PAGE, DEFAULT_PAGE_SIZE, NearbyUser, ProximityQuery,
};
use geotrail_domain::travel::DISTANCE_UNIT;
use geotrail_domain::util::{format_ms_rfc3339, parse_rfc3339_ms};
use geotrail_infra::http::error::{ApiError, map_domain_error, map_remote_error};
use geotrail_infra::http::middleware::{correlation_id_from_headers, request_id_from_headers};
use geotrail_infra::http::validation;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::observability::{
    self, INGEST_COMMITTED, INGEST_INCONSISTENT, INGEST_LOCAL_FAILED, INGEST_REJECTED,
};
use crate::state::AppState;

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateLocationRequest {
    #[validate(length(min = 4, max = 16))]
    pub username: String,
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
}

#[derive(Debug, Serialize)]
pub struct UpdateLocationResponse {
    pub status: &'static str,
}

pub async fn update_location(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<UpdateLocationRequest>, JsonRejection>,
) -> Result<Json<UpdateLocationResponse>, ApiError> {
    let payload = payload
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
        .and_then(|Json(payload)| validation::validate(&payload).map(|()| payload))
        .inspect_err(|_| observability::register_ingest_outcome(INGEST_REJECTED))?;

    let input = PingInput {
        username: payload.username,
        latitude: payload.latitude,
        longitude: payload.longitude,
    };
    let outcome = state
        .ingest
        .ingest(
            input,
            request_id_from_headers(&headers),
            correlation_id_from_headers(&headers),
        )
        .await;

    match outcome {
        Ok(IngestOutcome::Committed(_)) => {
            observability::register_ingest_outcome(INGEST_COMMITTED);
            Ok(Json(UpdateLocationResponse {
                status: "location updated",
            }))
        }
        Ok(IngestOutcome::Inconsistent { error, .. }) => {
            observability::register_ingest_outcome(INGEST_INCONSISTENT);
            observability::register_remote_failure("forward_ping", error.kind());
            Err(ApiError::PartialWrite(error.to_string()))
        }
        Err(DomainError::Validation(message)) => {
            observability::register_ingest_outcome(INGEST_REJECTED);
            Err(ApiError::Validation(message))
        }
        // Only reachable when the remote leg task itself died after the local commit.
        Err(DomainError::Remote(error)) => {
            observability::register_ingest_outcome(INGEST_INCONSISTENT);
            Err(ApiError::PartialWrite(error.to_string()))
        }
        Err(err) => {
            observability::register_ingest_outcome(INGEST_LOCAL_FAILED);
            Err(map_domain_error(err))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchUsersParams {
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SearchUsersResponse {
    pub users: Vec<NearbyUser>,
    pub total: usize,
}

pub async fn search_users(
    State(state): State<AppState>,
    params: Result<Query<SearchUsersParams>, QueryRejection>,
) -> Result<Json<SearchUsersResponse>, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let query = ProximityQuery {
        latitude: params.latitude,
        longitude: params.longitude,
        radius_km: params.radius,
        page: params.page.unwrap_or(DEFAULT_PAGE),
        page_size: params.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
    };
    let page = state
        .proximity
        .search(&query)
        .await
        .map_err(map_domain_error)?;
    Ok(Json(SearchUsersResponse {
        total: page.total,
        users: page.users,
    }))
}

#[derive(Debug, Deserialize)]
pub struct TravelDistanceParams {
    pub username: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TravelDistanceResponse {
    pub username: String,
    pub distance: f64,
    pub unit: &'static str,
    pub start: String,
    pub end: String,
}

pub async fn travel_distance(
    State(state): State<AppState>,
    params: Result<Query<TravelDistanceParams>, QueryRejection>,
) -> Result<Json<TravelDistanceResponse>, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    validate_username(&params.username).map_err(map_domain_error)?;
    let start_ms = optional_timestamp("start", params.start.as_deref())?;
    let end_ms = optional_timestamp("end", params.end.as_deref())?;
    let window = TimeWindow::resolve(start_ms, end_ms, now_ms()).map_err(map_domain_error)?;

    let distance = state
        .history
        .travel_distance(&params.username, window)
        .await
        .map_err(|err| {
            observability::register_remote_failure("travel_distance", err.kind());
            map_remote_error(err)
        })?;

    Ok(Json(TravelDistanceResponse {
        username: distance.username,
        distance: distance.total_km,
        unit: DISTANCE_UNIT,
        start: format_ms_rfc3339(distance.window.start_ms).map_err(map_domain_error)?,
        end: format_ms_rfc3339(distance.window.end_ms).map_err(map_domain_error)?,
    }))
}

/// Empty query values count as absent.
fn optional_timestamp(field: &str, value: Option<&str>) -> Result<Option<i64>, ApiError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => parse_rfc3339_ms(field, value)
            .map(Some)
            .map_err(map_domain_error),
        None => Ok(None),
    }
}
