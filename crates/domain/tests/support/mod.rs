#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use geotrail_domain::geo::BoundingBox;
use geotrail_domain::locations::{LocationPing, TimeWindow};
use geotrail_domain::ports::BoxFuture;
use geotrail_domain::ports::history::{HistoryClient, RemoteCallError};
use geotrail_domain::ports::locations::StorageError;
use geotrail_domain::ports::proximity::ProximityRepository;
use geotrail_domain::proximity::UserPosition;
use geotrail_domain::travel::TravelDistance;

#[derive(Clone, Copy, Debug)]
pub enum Behaviour {
    Accept,
    Fail,
    Reject(u16),
    Hang,
}

/// History client double that records every forwarded ping.
#[derive(Clone)]
pub struct FakeHistory {
    behaviour: Arc<Mutex<Behaviour>>,
    forwarded: Arc<Mutex<Vec<LocationPing>>>,
}

impl FakeHistory {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour: Arc::new(Mutex::new(behaviour)),
            forwarded: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set(&self, behaviour: Behaviour) {
        *self.behaviour.lock().unwrap() = behaviour;
    }

    pub fn forwarded(&self) -> Vec<LocationPing> {
        self.forwarded.lock().unwrap().clone()
    }
}

impl HistoryClient for FakeHistory {
    fn forward_ping(&self, ping: &LocationPing) -> BoxFuture<'_, Result<(), RemoteCallError>> {
        let ping = ping.clone();
        Box::pin(async move {
            self.forwarded.lock().unwrap().push(ping);
            let behaviour = *self.behaviour.lock().unwrap();
            match behaviour {
                Behaviour::Accept => Ok(()),
                Behaviour::Fail => Err(RemoteCallError::Unavailable("connection refused".into())),
                Behaviour::Reject(status) => Err(RemoteCallError::Rejected {
                    status,
                    message: "rejected".into(),
                }),
                Behaviour::Hang => std::future::pending().await,
            }
        })
    }

    fn travel_distance(
        &self,
        username: &str,
        window: TimeWindow,
    ) -> BoxFuture<'_, Result<TravelDistance, RemoteCallError>> {
        let username = username.to_string();
        Box::pin(async move {
            Ok(TravelDistance {
                username,
                total_km: 0.0,
                point_count: 0,
                window,
            })
        })
    }
}

/// Projection that refuses every write.
pub struct BrokenProjection;

impl ProximityRepository for BrokenProjection {
    fn upsert_position(&self, _position: &UserPosition) -> BoxFuture<'_, Result<(), StorageError>> {
        Box::pin(async { Err(StorageError::Unavailable("disk full".into())) })
    }

    fn candidates(
        &self,
        _bbox: &BoundingBox,
        _limit: usize,
        _offset: usize,
    ) -> BoxFuture<'_, Result<Vec<UserPosition>, StorageError>> {
        Box::pin(async { Err(StorageError::Unavailable("disk full".into())) })
    }
}
