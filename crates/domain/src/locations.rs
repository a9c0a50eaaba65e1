use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::BoxFuture;
use crate::ports::locations::{LocationStore, StorageError};
use crate::util::ensure_rfc3339_range;

pub const USERNAME_MIN_LENGTH: usize = 4;
pub const USERNAME_MAX_LENGTH: usize = 16;
pub const DEFAULT_WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// One stored observation. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LocationPing {
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at_ms: i64,
}

impl LocationPing {
    /// Builds a ping after running the full validation gate.
    pub fn new(
        username: impl Into<String>,
        latitude: f64,
        longitude: f64,
        recorded_at_ms: i64,
    ) -> DomainResult<Self> {
        let username = username.into();
        validate_username(&username)?;
        validate_coordinates(latitude, longitude)?;
        ensure_rfc3339_range("timestamp", recorded_at_ms)?;
        Ok(Self {
            username,
            latitude,
            longitude,
            recorded_at_ms,
        })
    }

    pub fn track_point(&self) -> TrackPoint {
        TrackPoint {
            latitude: self.latitude,
            longitude: self.longitude,
            recorded_at_ms: self.recorded_at_ms,
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrackPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at_ms: i64,
}

/// Inclusive time range in epoch milliseconds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    /// Fills in missing bounds relative to a single `now_ms` captured by the caller.
    ///
    /// No bounds: the 24 hours ending at `now_ms`. Only `end`: the 24 hours
    /// ending at `end`. Only `start`: from `start` up to `now_ms`.
    pub fn resolve(start_ms: Option<i64>, end_ms: Option<i64>, now_ms: i64) -> DomainResult<Self> {
        let end_ms = end_ms.unwrap_or(now_ms);
        let start_ms = start_ms.unwrap_or_else(|| end_ms.saturating_sub(DEFAULT_WINDOW_MS));
        if start_ms > end_ms {
            return Err(DomainError::Validation(
                "start must not be after end".to_string(),
            ));
        }
        ensure_rfc3339_range("start", start_ms)?;
        ensure_rfc3339_range("end", end_ms)?;
        Ok(Self { start_ms, end_ms })
    }

    pub fn contains(&self, timestamp_ms: i64) -> bool {
        timestamp_ms >= self.start_ms && timestamp_ms <= self.end_ms
    }
}

pub fn validate_username(username: &str) -> DomainResult<()> {
    let length = username.chars().count();
    if !(USERNAME_MIN_LENGTH..=USERNAME_MAX_LENGTH).contains(&length)
        || !username.chars().all(|ch| ch.is_ascii_alphanumeric())
    {
        return Err(DomainError::Validation(format!(
            "username must be {USERNAME_MIN_LENGTH}-{USERNAME_MAX_LENGTH} alphanumeric characters"
        )));
    }
    Ok(())
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> DomainResult<()> {
    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(DomainError::Validation(
            "latitude must be between -90 and 90".to_string(),
        ));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(DomainError::Validation(
            "longitude must be between -180 and 180".to_string(),
        ));
    }
    Ok(())
}

/// Process-local canonical store used by the `memory` backend and by tests.
#[derive(Clone, Default)]
pub struct InMemoryLocationStore {
    series: Arc<RwLock<HashMap<String, Vec<TrackPoint>>>>,
}

impl InMemoryLocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn point_count(&self, username: &str) -> usize {
        self.series
            .read()
            .await
            .get(username)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl LocationStore for InMemoryLocationStore {
    fn append(&self, ping: &LocationPing) -> BoxFuture<'_, Result<(), StorageError>> {
        let username = ping.username.clone();
        let point = ping.track_point();
        let series = self.series.clone();
        Box::pin(async move {
            series.write().await.entry(username).or_default().push(point);
            Ok(())
        })
    }

    fn query_range(
        &self,
        username: &str,
        window: TimeWindow,
    ) -> BoxFuture<'_, Result<Vec<TrackPoint>, StorageError>> {
        let username = username.to_string();
        let series = self.series.clone();
        Box::pin(async move {
            let series = series.read().await;
            let mut points: Vec<TrackPoint> = series
                .get(&username)
                .map(|points| {
                    points
                        .iter()
                        .filter(|point| window.contains(point.recorded_at_ms))
                        .copied()
                        .collect()
                })
                .unwrap_or_default();
            // Stable: equal timestamps keep insertion order.
            points.sort_by_key(|point| point.recorded_at_ms);
            Ok(points)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::MIN_RFC3339_MS;

    #[test]
    fn username_pattern() {
        assert!(validate_username("alice123").is_ok());
        assert!(validate_username("abcd").is_ok());
        assert!(validate_username("a234567890123456").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("a2345678901234567").is_err());
        assert!(validate_username("alice_1").is_err());
        assert!(validate_username("álice").is_err());
        assert!(validate_username("").is_err());
    }

    #[test]
    fn coordinate_bounds_are_inclusive() {
        assert!(validate_coordinates(90.0, 180.0).is_ok());
        assert!(validate_coordinates(-90.0, -180.0).is_ok());
        assert!(validate_coordinates(90.0001, 0.0).is_err());
        assert!(validate_coordinates(0.0, -180.0001).is_err());
        assert!(validate_coordinates(f64::NAN, 0.0).is_err());
        assert!(validate_coordinates(0.0, f64::INFINITY).is_err());
    }

    #[test]
    fn window_defaults_to_last_day() {
        let now = 1_700_000_000_000;
        let window = TimeWindow::resolve(None, None, now).unwrap();
        assert_eq!(window.end_ms, now);
        assert_eq!(window.start_ms, now - DEFAULT_WINDOW_MS);
    }

    #[test]
    fn window_fills_single_missing_bound() {
        let now = 1_700_000_000_000;
        let only_end = TimeWindow::resolve(None, Some(now - 1_000), now).unwrap();
        assert_eq!(only_end.start_ms, now - 1_000 - DEFAULT_WINDOW_MS);
        let only_start = TimeWindow::resolve(Some(now - 5_000), None, now).unwrap();
        assert_eq!(only_start.end_ms, now);
    }

    #[test]
    fn inverted_window_is_rejected() {
        assert!(TimeWindow::resolve(Some(10), Some(5), 20).is_err());
        let point = TimeWindow::resolve(Some(5), Some(5), 20).unwrap();
        assert!(point.contains(5));
    }

    #[test]
    fn window_before_year_zero_is_rejected() {
        // The default start would land in year -1.
        let err = TimeWindow::resolve(None, Some(MIN_RFC3339_MS), 20).unwrap_err();
        assert!(matches!(err, DomainError::Validation(message) if message.starts_with("start")));

        let earliest =
            TimeWindow::resolve(Some(MIN_RFC3339_MS), Some(MIN_RFC3339_MS + 1), 20).unwrap();
        assert_eq!(earliest.start_ms, MIN_RFC3339_MS);
    }

    #[test]
    fn ping_timestamp_must_be_representable() {
        assert!(LocationPing::new("alice123", 0.0, 0.0, MIN_RFC3339_MS - 1).is_err());
        assert!(LocationPing::new("alice123", 0.0, 0.0, MIN_RFC3339_MS).is_ok());
    }

    #[tokio::test]
    async fn memory_store_returns_window_in_timestamp_order() {
        let store = InMemoryLocationStore::new();
        for (lat, ts) in [(3.0, 300), (1.0, 100), (4.0, 400), (2.0, 200)] {
            let ping = LocationPing::new("alice123", lat, 0.0, ts).unwrap();
            store.append(&ping).await.unwrap();
        }
        let points = store
            .query_range(
                "alice123",
                TimeWindow {
                    start_ms: 100,
                    end_ms: 300,
                },
            )
            .await
            .unwrap();
        let stamps: Vec<i64> = points.iter().map(|point| point.recorded_at_ms).collect();
        assert_eq!(stamps, vec![100, 200, 300]);
        assert_eq!(store.point_count("alice123").await, 4);
    }

    #[tokio::test]
    async fn memory_store_unknown_user_is_empty() {
        let store = InMemoryLocationStore::new();
        let points = store
            .query_range("nobody1", TimeWindow { start_ms: 0, end_ms: i64::MAX })
            .await
            .unwrap();
        assert!(points.is_empty());
    }
}
