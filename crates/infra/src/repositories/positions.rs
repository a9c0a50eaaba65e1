use std::sync::Arc;

use geotrail_domain::geo::BoundingBox;
use geotrail_domain::ports::BoxFuture;
use geotrail_domain::ports::locations::StorageError;
use geotrail_domain::ports::proximity::ProximityRepository;
use geotrail_domain::proximity::UserPosition;
use serde::Deserialize;
use serde_json::Value;
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::Client;

use super::map_surreal_error;
use crate::db::{self, DbConfig};

const SCHEMA: &str = "\
    DEFINE TABLE IF NOT EXISTS user_position SCHEMALESS; \
    DEFINE INDEX IF NOT EXISTS user_position_lat_lon ON user_position FIELDS latitude, longitude;";

// Keyed by username so there is exactly one row per user. The guard keeps a
// delayed older ping from replacing a newer position.
const UPSERT_LATEST: &str = "\
    BEGIN TRANSACTION; \
    LET $current = (SELECT VALUE recorded_at_ms FROM ONLY type::thing('user_position', $username)); \
    IF $current = NONE OR $current <= $recorded_at_ms { \
        UPSERT type::thing('user_position', $username) CONTENT { \
            username: $username, latitude: $latitude, longitude: $longitude, \
            recorded_at_ms: $recorded_at_ms \
        }; \
    }; \
    COMMIT TRANSACTION;";

#[derive(Debug, Deserialize)]
struct SurrealPositionRow {
    username: String,
    latitude: f64,
    longitude: f64,
    recorded_at_ms: i64,
}

/// Latest-position projection backing proximity search.
#[derive(Clone)]
pub struct SurrealProximityRepository {
    client: Arc<Surreal<Client>>,
}

impl SurrealProximityRepository {
    pub fn with_client(client: Arc<Surreal<Client>>) -> Self {
        Self { client }
    }

    pub async fn new(db_config: &DbConfig) -> anyhow::Result<Self> {
        let repository = Self::with_client(db::connect(db_config).await?);
        repository.ensure_schema().await?;
        Ok(repository)
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

    fn candidate_query(bbox: &BoundingBox) -> String {
        let longitude = if bbox.crosses_antimeridian() {
            "(longitude >= $min_lon OR longitude <= $max_lon)"
        } else {
            "longitude >= $min_lon AND longitude <= $max_lon"
        };
        format!(
            "SELECT username, latitude, longitude, recorded_at_ms FROM user_position \
             WHERE latitude >= $min_lat AND latitude <= $max_lat AND {longitude} \
             ORDER BY username ASC LIMIT $limit START $offset"
        )
    }

    fn decode_rows(rows: Vec<Value>) -> Result<Vec<UserPosition>, StorageError> {
        rows.into_iter()
            .map(|row| {
                serde_json::from_value::<SurrealPositionRow>(row)
                    .map(|row| UserPosition {
                        username: row.username,
                        latitude: row.latitude,
                        longitude: row.longitude,
                        recorded_at_ms: row.recorded_at_ms,
                    })
                    .map_err(|err| {
                        StorageError::InvalidRecord(format!("invalid user_position row: {err}"))
                    })
            })
            .collect()
    }
}

impl ProximityRepository for SurrealProximityRepository {
    fn upsert_position(&self, position: &UserPosition) -> BoxFuture<'_, Result<(), StorageError>> {
        let position = position.clone();
        let client = self.client.clone();
        Box::pin(async move {
            client
                .query(UPSERT_LATEST)
                .bind(("username", position.username))
                .bind(("latitude", position.latitude))
                .bind(("longitude", position.longitude))
                .bind(("recorded_at_ms", position.recorded_at_ms))
                .await
                .map_err(map_surreal_error)?
                .check()
                .map_err(map_surreal_error)?;
            Ok(())
        })
    }

    fn candidates(
        &self,
        bbox: &BoundingBox,
        limit: usize,
        offset: usize,
    ) -> BoxFuture<'_, Result<Vec<UserPosition>, StorageError>> {
        let bbox = *bbox;
        let client = self.client.clone();
        Box::pin(async move {
            let mut response = client
                .query(Self::candidate_query(&bbox))
                .bind(("min_lat", bbox.min_lat))
                .bind(("max_lat", bbox.max_lat))
                .bind(("min_lon", bbox.min_lon))
                .bind(("max_lon", bbox.max_lon))
                .bind(("limit", limit as i64))
                .bind(("offset", offset as i64))
                .await
                .map_err(map_surreal_error)?;
            let rows: Vec<Value> = response.take(0).map_err(|err| {
                StorageError::InvalidRecord(format!("invalid query result: {err}"))
            })?;
            Self::decode_rows(rows)
        })
    }
}
