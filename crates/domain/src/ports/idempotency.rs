use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::BoxFuture;
use crate::locations::LocationPing;

const PING_SCOPE: &str = "location_ping";

/// Identity of a replayable write. Pings carry no id of their own, so a ping is
/// identified by its owner and the instant it was minted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdempotencyKey {
    pub scope: String,
    pub subject: String,
    pub discriminator: String,
}

impl IdempotencyKey {
    pub fn new(
        scope: impl Into<String>,
        subject: impl Into<String>,
        discriminator: impl Into<String>,
    ) -> Self {
        Self {
            scope: scope.into(),
            subject: subject.into(),
            discriminator: discriminator.into(),
        }
    }

    pub fn for_ping(ping: &LocationPing) -> Self {
        Self::new(
            PING_SCOPE,
            ping.username.clone(),
            ping.recorded_at_ms.to_string(),
        )
    }

    pub fn cache_key(&self, prefix: &str) -> String {
        format!(
            "{prefix}:{}:{}:{}",
            self.scope, self.subject, self.discriminator
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdempotencyResponse {
    pub status_code: u16,
    pub body: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum IdempotencyState {
    InProgress,
    Completed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IdempotencyRecord {
    pub state: IdempotencyState,
    pub response: Option<IdempotencyResponse>,
}

impl IdempotencyRecord {
    pub fn in_progress() -> Self {
        Self {
            state: IdempotencyState::InProgress,
            response: None,
        }
    }

    pub fn completed(response: IdempotencyResponse) -> Self {
        Self {
            state: IdempotencyState::Completed,
            response: Some(response),
        }
    }
}

#[derive(Debug, Error)]
pub enum IdempotencyError {
    #[error("idempotency store unavailable: {0}")]
    Unavailable(String),
    #[error("idempotency serialization error: {0}")]
    Serialization(String),
    #[error("idempotency store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PutOutcome {
    Stored,
    Existing(IdempotencyRecord),
}

pub trait IdempotencyStore: Send + Sync {
    fn put_if_absent(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<PutOutcome, IdempotencyError>>;
    fn update(
        &self,
        key: &IdempotencyKey,
        record: &IdempotencyRecord,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), IdempotencyError>>;
    /// Drops a claim so a failed write can be attempted again before the claim expires.
    fn release(&self, key: &IdempotencyKey) -> BoxFuture<'_, Result<(), IdempotencyError>>;
}
