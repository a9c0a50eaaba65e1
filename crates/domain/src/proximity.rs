//! "Who is near this point" as a two-stage pipeline.
//!
//! Stage one asks the repository for a page of positions inside a bounding
//! box, which over-approximates the search circle. Stage two recomputes the
//! great-circle distance for every candidate and drops the ones outside the
//! radius. Paging happens in stage one, so a page may hold fewer than
//! `page_size` users and `total` counts the users in this page only.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::DomainResult;
use crate::error::DomainError;
use crate::geo::{BoundingBox, haversine_km};
use crate::locations::{LocationPing, validate_coordinates};
use crate::ports::BoxFuture;
use crate::ports::locations::StorageError;
use crate::ports::proximity::ProximityRepository;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Latest known position of a user in the management projection.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UserPosition {
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at_ms: i64,
}

impl From<&LocationPing> for UserPosition {
    fn from(ping: &LocationPing) -> Self {
        Self {
            username: ping.username.clone(),
            latitude: ping.latitude,
            longitude: ping.longitude,
            recorded_at_ms: ping.recorded_at_ms,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProximityQuery {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
    pub page: u32,
    pub page_size: u32,
}

/// Output of the coarse stage: what to ask the repository for.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CandidateWindow {
    pub bbox: BoundingBox,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NearbyUser {
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
    pub distance_km: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProximityPage {
    pub users: Vec<NearbyUser>,
    /// Matches in this page, not across all pages.
    pub total: usize,
}

impl ProximityQuery {
    pub fn validate(&self) -> DomainResult<()> {
        validate_coordinates(self.latitude, self.longitude)?;
        if !self.radius_km.is_finite() || self.radius_km <= 0.0 {
            return Err(DomainError::Validation(
                "radius must be a positive number of kilometers".to_string(),
            ));
        }
        if self.page == 0 {
            return Err(DomainError::Validation("page starts at 1".to_string()));
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(DomainError::Validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        Ok(())
    }

    pub fn candidate_window(&self) -> CandidateWindow {
        let limit = self.page_size as usize;
        CandidateWindow {
            bbox: BoundingBox::around(self.latitude, self.longitude, self.radius_km),
            limit,
            offset: (self.page.saturating_sub(1) as usize).saturating_mul(limit),
        }
    }
}

/// Exact stage. Keeps candidate order and drops anything beyond `radius_km`.
pub fn exact_recheck(
    latitude: f64,
    longitude: f64,
    radius_km: f64,
    candidates: Vec<UserPosition>,
) -> Vec<NearbyUser> {
    candidates
        .into_iter()
        .filter_map(|candidate| {
            let distance_km =
                haversine_km(latitude, longitude, candidate.latitude, candidate.longitude);
            (distance_km <= radius_km).then(|| NearbyUser {
                username: candidate.username,
                latitude: candidate.latitude,
                longitude: candidate.longitude,
                distance_km,
            })
        })
        .collect()
}

#[derive(Clone)]
pub struct ProximityService {
    repository: Arc<dyn ProximityRepository>,
}

impl ProximityService {
    pub fn new(repository: Arc<dyn ProximityRepository>) -> Self {
        Self { repository }
    }

    pub async fn search(&self, query: &ProximityQuery) -> DomainResult<ProximityPage> {
        query.validate()?;
        let window = query.candidate_window();
        let candidates = self
            .repository
            .candidates(&window.bbox, window.limit, window.offset)
            .await?;
        let fetched = candidates.len();
        let users = exact_recheck(query.latitude, query.longitude, query.radius_km, candidates);
        tracing::debug!(
            fetched,
            kept = users.len(),
            radius_km = query.radius_km,
            page = query.page,
            "proximity search"
        );
        Ok(ProximityPage {
            total: users.len(),
            users,
        })
    }
}

#[derive(Clone, Default)]
pub struct InMemoryProximityRepository {
    positions: Arc<RwLock<HashMap<String, UserPosition>>>,
}

impl InMemoryProximityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, username: &str) -> Option<UserPosition> {
        self.positions.read().await.get(username).cloned()
    }
}

impl ProximityRepository for InMemoryProximityRepository {
    fn upsert_position(&self, position: &UserPosition) -> BoxFuture<'_, Result<(), StorageError>> {
        let position = position.clone();
        let positions = self.positions.clone();
        Box::pin(async move {
            let mut positions = positions.write().await;
            let newer = positions
                .get(&position.username)
                .is_none_or(|current| current.recorded_at_ms <= position.recorded_at_ms);
            if newer {
                positions.insert(position.username.clone(), position);
            }
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
        let positions = self.positions.clone();
        Box::pin(async move {
            let positions = positions.read().await;
            let mut inside: Vec<UserPosition> = positions
                .values()
                .filter(|position| bbox.contains(position.latitude, position.longitude))
                .cloned()
                .collect();
            inside.sort_by(|a, b| a.username.cmp(&b.username));
            Ok(inside.into_iter().skip(offset).take(limit).collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(username: &str, latitude: f64, longitude: f64) -> UserPosition {
        UserPosition {
            username: username.to_string(),
            latitude,
            longitude,
            recorded_at_ms: 0,
        }
    }

    fn query(radius_km: f64, page: u32, page_size: u32) -> ProximityQuery {
        ProximityQuery {
            latitude: 0.0,
            longitude: 0.0,
            radius_km,
            page,
            page_size,
        }
    }

    #[test]
    fn recheck_drops_box_corners() {
        let radius = 100.0;
        let bbox = BoundingBox::around(0.0, 0.0, radius);
        // Box corner: inside the rectangle, outside the circle.
        let corner = position("corner1", bbox.max_lat - 1e-6, bbox.max_lon - 1e-6);
        let near = position("near1", 0.1, 0.1);
        assert!(bbox.contains(corner.latitude, corner.longitude));

        let kept = exact_recheck(0.0, 0.0, radius, vec![corner, near]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].username, "near1");
        assert!(kept[0].distance_km <= radius);
    }

    #[test]
    fn candidate_window_offsets_by_page() {
        let window = query(5.0, 3, 20).candidate_window();
        assert_eq!(window.limit, 20);
        assert_eq!(window.offset, 40);
    }

    #[test]
    fn query_validation() {
        assert!(query(5.0, 1, 10).validate().is_ok());
        assert!(query(0.0, 1, 10).validate().is_err());
        assert!(query(f64::NAN, 1, 10).validate().is_err());
        assert!(query(5.0, 0, 10).validate().is_err());
        assert!(query(5.0, 1, 0).validate().is_err());
        assert!(query(5.0, 1, MAX_PAGE_SIZE + 1).validate().is_err());
        let mut bad_center = query(5.0, 1, 10);
        bad_center.latitude = 91.0;
        assert!(bad_center.validate().is_err());
    }

    #[tokio::test]
    async fn page_total_counts_only_survivors() {
        let repository = Arc::new(InMemoryProximityRepository::new());
        let bbox = BoundingBox::around(0.0, 0.0, 100.0);
        for (name, lat, lon) in [
            ("aaaa", 0.1, 0.1),
            ("bbbb", bbox.max_lat - 1e-6, bbox.max_lon - 1e-6),
            ("cccc", 0.2, -0.2),
            ("dddd", 5.0, 5.0),
        ] {
            repository
                .upsert_position(&position(name, lat, lon))
                .await
                .unwrap();
        }
        let service = ProximityService::new(repository);

        // First page fetches aaaa and bbbb; bbbb is a false positive.
        let first = service.search(&query(100.0, 1, 2)).await.unwrap();
        assert_eq!(first.total, 1);
        assert_eq!(first.users[0].username, "aaaa");

        let second = service.search(&query(100.0, 2, 2)).await.unwrap();
        assert_eq!(second.total, 1);
        assert_eq!(second.users[0].username, "cccc");

        let third = service.search(&query(100.0, 3, 2)).await.unwrap();
        assert_eq!(third.total, 0);
    }

    #[tokio::test]
    async fn older_position_does_not_overwrite_newer() {
        let repository = InMemoryProximityRepository::new();
        let mut newer = position("alice123", 1.0, 1.0);
        newer.recorded_at_ms = 200;
        let mut older = position("alice123", 2.0, 2.0);
        older.recorded_at_ms = 100;
        repository.upsert_position(&newer).await.unwrap();
        repository.upsert_position(&older).await.unwrap();
        assert_eq!(repository.get("alice123").await, Some(newer));
    }
}
