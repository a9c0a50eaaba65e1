use std::sync::Arc;

use geotrail_domain::locations::{LocationPing, TimeWindow, TrackPoint};
use geotrail_domain::ports::BoxFuture;
use geotrail_domain::ports::locations::{LocationStore, StorageError};
use geotrail_domain::util::format_ms_rfc3339;
use serde::Deserialize;
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;

use super::map_surreal_error;
use crate::db::{self, DbConfig};

const SCHEMA: &str = "\
    DEFINE TABLE IF NOT EXISTS location_ping SCHEMALESS; \
    DEFINE INDEX IF NOT EXISTS location_ping_user_time ON location_ping FIELDS username, recorded_at_ms;";

#[derive(Debug, Deserialize)]
struct SurrealTrackRow {
    latitude: f64,
    longitude: f64,
    recorded_at_ms: i64,
}

/// Canonical series, one row per ping. `recorded_at_ms` drives range scans;
/// `recorded_at` is the same instant as a datetime for ad-hoc queries.
#[derive(Clone)]
pub struct SurrealLocationStore {
    client: Arc<Surreal<Client>>,
}

impl SurrealLocationStore {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        let store = Self::with_client(db::connect(db_config).await?);
        store.ensure_schema().await?;
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.client
            .query(SCHEMA)
            .await
            .map_err(map_surreal_error)?
            .check()
            .map_err(map_surreal_error)?;
        Ok(())
    }

    fn decode_rows(rows: Vec<Value>) -> Result<Vec<TrackPoint>, StorageError> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<SurrealTrackRow>(row)
                    .map(|row| TrackPoint {
                        latitude: row.latitude,
                        longitude: row.longitude,
                        recorded_at_ms: row.recorded_at_ms,
                    })
                    .map_err(|err| {
                        StorageError::InvalidRecord(format!("invalid location_ping row: {err}"))
                    })
            })
            .collect()
    }
}

impl LocationStore for SurrealLocationStore {
    fn append(&self, ping: &LocationPing) -> BoxFuture<'_, Result<(), StorageError>> {
        let ping = ping.clone();
        let client = self.client.clone();
        Box::pin(async move {
            let recorded_at = format_ms_rfc3339(ping.recorded_at_ms)
                .map_err(|err| StorageError::InvalidRecord(err.to_string()))?;
            client
                .query(
                    "CREATE location_ping CONTENT { \
                        username: $username, latitude: $latitude, longitude: $longitude, \
                        recorded_at_ms: $recorded_at_ms, recorded_at: <datetime>$recorded_at \
                     }",
                )
                .bind(("username", ping.username))
                .bind(("latitude", ping.latitude))
                .bind(("longitude", ping.longitude))
                .bind(("recorded_at_ms", ping.recorded_at_ms))
                .bind(("recorded_at", recorded_at))
                .await
                .map_err(map_surreal_error)?
                .check()
                .map_err(map_surreal_error)?;
            Ok(())
        })
    }

    fn query_range(
        &self,
        username: &str,
        window: TimeWindow,
    ) -> BoxFuture<'_, Result<Vec<TrackPoint>, StorageError>> {
        let username = username.to_string();
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(
                    "SELECT latitude, longitude, recorded_at_ms FROM location_ping \
                     WHERE username = $username \
                       AND recorded_at_ms >= $start_ms AND recorded_at_ms <= $end_ms \
                     ORDER BY recorded_at_ms ASC",
                )
                .bind(("username", username))
                .bind(("start_ms", window.start_ms))
                .bind(("end_ms", window.end_ms))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(|err| {
                StorageError::InvalidRecord(format!("invalid query result: {err}"))
            })?;
            Self::decode_rows(rows)
        })
    }
}
