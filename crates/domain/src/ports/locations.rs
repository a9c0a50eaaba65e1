use thiserror::Error;

use super::BoxFuture;
use crate::locations::{LocationPing, TimeWindow, TrackPoint};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored record is invalid: {0}")]
    InvalidRecord(String),
}

/// Canonical, append-only series of pings per user.
///
/// `query_range` must return points in ascending `recorded_at_ms` order with
/// inclusive bounds; aggregation downstream relies on it and never re-sorts.
pub trait LocationStore: Send + Sync {
    fn append(&self, ping: &LocationPing) -> BoxFuture<'_, Result<(), StorageError>>;

    fn query_range(
        &self,
        username: &str,
        window: TimeWindow,
    ) -> BoxFuture<'_, Result<Vec<TrackPoint>, StorageError>>;
}
