//! JSON bodies exchanged between the management and history services.

use geotrail_domain::error::DomainError;
use geotrail_domain::locations::LocationPing;
use geotrail_domain::util::format_ms_rfc3339;
use serde::{Deserialize, Serialize};

pub const LOCATIONS_PATH: &str = "/internal/v1/locations";
pub const TRAVEL_DISTANCE_PATH: &str = "/internal/v1/travel-distance";
pub const STATUS_SUCCESS: &str = "Success";
pub const STATUS_FAILED: &str = "Failed";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecordPingRequest {
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
    /// RFC3339 with millisecond precision, minted by the management service.
    pub timestamp: String,
}

impl TryFrom<&LocationPing> for RecordPingRequest {
    type Error = DomainError;

    fn try_from(ping: &LocationPing) -> Result<Self, Self::Error> {
        Ok(Self {
            username: ping.username.clone(),
            latitude: ping.latitude,
            longitude: ping.longitude,
            timestamp: format_ms_rfc3339(ping.recorded_at_ms)?,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecordPingResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordPingResponse {
    pub fn success() -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: STATUS_FAILED.to_string(),
            error: Some(error.into()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TravelDistanceQuery {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TravelDistanceResponse {
    pub username: String,
    pub distance: f64,
    pub unit: String,
    pub start: String,
    pub end: String,
    pub point_count: usize,
}
