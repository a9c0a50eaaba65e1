use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::geo::haversine_km;
use crate::locations::{TimeWindow, TrackPoint, validate_username};
use crate::ports::locations::LocationStore;

pub const DISTANCE_UNIT: &str = "kilometers";

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TravelDistance {
    pub username: String,
    pub total_km: f64,
    pub point_count: usize,
    pub window: TimeWindow,
}

/// Path length along consecutive points, not displacement between the endpoints.
/// Fewer than two points travel nowhere.
pub fn path_length_km(points: &[TrackPoint]) -> f64 {
    let mut points = points.iter();
    let Some(first) = points.next() else {
        return 0.0;
    };
    let (total, _) = points.fold((0.0, first), |(total, prev), curr| {
        let hop = haversine_km(
            prev.latitude,
            prev.longitude,
            curr.latitude,
            curr.longitude,
        );
        (total + hop, curr)
    });
    total
}

#[derive(Clone)]
pub struct TravelDistanceService {
    store: Arc<dyn LocationStore>,
}

impl TravelDistanceService {
    pub fn new(store: Arc<dyn LocationStore>) -> Self {
        Self { store }
    }

    pub async fn travel_distance(
        &self,
        username: &str,
        window: TimeWindow,
    ) -> DomainResult<TravelDistance> {
        validate_username(username)?;
        let points = self.store.query_range(username, window).await?;
        let total_km = path_length_km(&points);
        tracing::debug!(
            username,
            point_count = points.len(),
            total_km,
            "travel distance computed"
        );
        Ok(TravelDistance {
            username: username.to_string(),
            total_km,
            point_count: points.len(),
            window,
        })
    }
}
