use std::sync::Arc;

use serde_json::json;

use crate::DomainResult;
use crate::error::DomainError;
use crate::idempotency::{BeginOutcome, IdempotencyService};
use crate::locations::LocationPing;
use crate::ports::idempotency::{IdempotencyError, IdempotencyKey, IdempotencyResponse};
use crate::ports::locations::{LocationStore, StorageError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordOutcome {
    Stored,
    /// Same (username, timestamp) was stored earlier; nothing appended.
    AlreadyStored,
}

/// History-side write path: validate, deduplicate, append.
#[derive(Clone)]
pub struct PingRecorder {
    store: Arc<dyn LocationStore>,
    idempotency: IdempotencyService,
}

impl PingRecorder {
    pub fn new(store: Arc<dyn LocationStore>, idempotency: IdempotencyService) -> Self {
        Self { store, idempotency }
    }

    pub async fn record(&self, ping: LocationPing) -> DomainResult<RecordOutcome> {
        let ping = LocationPing::new(
            ping.username,
            ping.latitude,
            ping.longitude,
            ping.recorded_at_ms,
        )?;
        let key = IdempotencyKey::for_ping(&ping);

        match self.idempotency.begin(&key).await.map_err(unavailable)? {
            BeginOutcome::Replay(_) => {
                tracing::info!(
                    username = %ping.username,
                    recorded_at_ms = ping.recorded_at_ms,
                    "duplicate ping ignored"
                );
                return Ok(RecordOutcome::AlreadyStored);
            }
            BeginOutcome::InProgress => {
                return Err(DomainError::Conflict(
                    "the same ping is being recorded".to_string(),
                ));
            }
            BeginOutcome::Started => {}
        }

        if let Err(err) = self.store.append(&ping).await {
            if let Err(release_err) = self.idempotency.abandon(&key).await {
                tracing::warn!(error = %release_err, "failed to release idempotency claim");
            }
            return Err(err.into());
        }

        let response = IdempotencyResponse {
            status_code: 200,
            body: json!({ "status": "Success" }),
        };
        // The row is durable at this point; a failed completion only leaves the claim to expire.
        if let Err(err) = self.idempotency.complete(&key, response).await {
            tracing::warn!(
                username = %ping.username,
                recorded_at_ms = ping.recorded_at_ms,
                error = %err,
                "failed to mark ping as recorded"
            );
        }
        Ok(RecordOutcome::Stored)
    }
}

fn unavailable(err: IdempotencyError) -> DomainError {
    DomainError::Storage(StorageError::Unavailable(err.to_string()))
}
