use std::sync::Arc;

use geotrail_domain::error::DomainError;
use geotrail_domain::geo::haversine_km;
use geotrail_domain::locations::{InMemoryLocationStore, LocationPing, TimeWindow, TrackPoint};
use geotrail_domain::ports::BoxFuture;
use geotrail_domain::ports::locations::{LocationStore, StorageError};
use geotrail_domain::travel::TravelDistanceService;

const T0: i64 = 1_714_564_800_000;

async fn seed(store: &InMemoryLocationStore, points: &[(f64, f64, i64)]) {
    for &(latitude, longitude, recorded_at_ms) in points {
        let ping = LocationPing::new("alice123", latitude, longitude, recorded_at_ms).unwrap();
        store.append(&ping).await.unwrap();
    }
}

fn window() -> TimeWindow {
    TimeWindow {
        start_ms: T0,
        end_ms: T0 + 3_600_000,
    }
}

#[tokio::test]
async fn order_of_arrival_does_not_matter() {
    let store = InMemoryLocationStore::new();
    let p1 = (37.7749, -122.4194, T0 + 1_000);
    let p2 = (37.8044, -122.2712, T0 + 2_000);
    let p3 = (37.3382, -121.8863, T0 + 3_000);
    seed(&store, &[p3, p1, p2]).await;
    let service = TravelDistanceService::new(Arc::new(store));

    let result = service.travel_distance("alice123", window()).await.unwrap();

    let expected = haversine_km(p1.0, p1.1, p2.0, p2.1) + haversine_km(p2.0, p2.1, p3.0, p3.1);
    assert!((result.total_km - expected).abs() < 1e-9);
    assert_eq!(result.point_count, 3);
}

#[tokio::test]
async fn single_ping_travels_nowhere() {
    let store = InMemoryLocationStore::new();
    seed(&store, &[(37.7749, -122.4194, T0 + 1_000)]).await;
    let service = TravelDistanceService::new(Arc::new(store));

    let result = service.travel_distance("alice123", window()).await.unwrap();

    assert_eq!(result.total_km, 0.0);
    assert_eq!(result.point_count, 1);
}

#[tokio::test]
async fn short_hop_is_measured_in_kilometres() {
    let store = InMemoryLocationStore::new();
    seed(
        &store,
        &[
            (37.7749, -122.4194, T0 + 1_000),
            (37.7750, -122.4195, T0 + 2_000),
        ],
    )
    .await;
    let service = TravelDistanceService::new(Arc::new(store));

    let result = service.travel_distance("alice123", window()).await.unwrap();

    assert!((result.total_km - 0.0141).abs() < 0.001, "{}", result.total_km);
}

#[tokio::test]
async fn points_outside_window_are_ignored() {
    let store = InMemoryLocationStore::new();
    seed(
        &store,
        &[
            (10.0, 10.0, T0 - 1),
            (37.7749, -122.4194, T0),
            (37.7749, -122.4194, T0 + 3_600_000),
            (50.0, 50.0, T0 + 3_600_001),
        ],
    )
    .await;
    let service = TravelDistanceService::new(Arc::new(store));

    let result = service.travel_distance("alice123", window()).await.unwrap();

    assert_eq!(result.point_count, 2);
    assert_eq!(result.total_km, 0.0);
}

#[tokio::test]
async fn unknown_user_has_zero_distance() {
    let service = TravelDistanceService::new(Arc::new(InMemoryLocationStore::new()));
    let result = service.travel_distance("nobody12", window()).await.unwrap();
    assert_eq!(result.total_km, 0.0);
    assert_eq!(result.point_count, 0);
}

struct UnreachableStore;

impl LocationStore for UnreachableStore {
    fn append(&self, _ping: &LocationPing) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async { Err(StorageError::Unavailable("connection reset".into())) })
    }

    fn query_range(
        &self,
        _username: &str,
        _window: TimeWindow,
    ) -> BoxFuture<'_, Result<Vec<TrackPoint>, StorageError>> {
        Box::pin(async { Err(StorageError::Unavailable("connection reset".into())) })
    }
}

#[tokio::test]
async fn storage_failure_is_not_reported_as_zero() {
    let service = TravelDistanceService::new(Arc::new(UnreachableStore));
    let err = service
        .travel_distance("alice123", window())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Storage(StorageError::Unavailable(_))));
}
