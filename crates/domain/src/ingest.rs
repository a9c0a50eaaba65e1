//! Dual write of a ping: the local proximity projection first, then the
//! history service that owns the canonical series.
//!
//! ```text
//! Validated ──local ok──▶ LocalCommitted ──remote ok──▶ Committed
//!     │                         │
//!  local err                remote err / timeout
//!     ▼                         ▼
//!  StorageError            Inconsistent (local write kept, replay scheduled)
//! ```
//!
//! There is no shared transaction, so the local write is never rolled back.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::DomainResult;
use crate::jobs::now_ms;
use crate::locations::LocationPing;
use crate::ports::history::{HistoryClient, RemoteCallError};
use crate::ports::proximity::ProximityRepository;
use crate::proximity::UserPosition;
use crate::replay::ReplayService;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestState {
    Validated,
    LocalCommitted,
    Committed,
    Inconsistent,
}

impl IngestState {
    pub fn as_str(self) -> &'static str {
        match self {
            IngestState::Validated => "validated",
            IngestState::LocalCommitted => "local_committed",
            IngestState::Committed => "committed",
            IngestState::Inconsistent => "inconsistent",
        }
    }
}

#[derive(Clone, Debug)]
pub struct PingInput {
    pub username: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum IngestOutcome {
    Committed(LocationPing),
    /// Local projection has the ping, history does not (yet).
    Inconsistent {
        ping: LocationPing,
        error: RemoteCallError,
        replay_job_id: Option<String>,
    },
}

impl IngestOutcome {
    pub fn state(&self) -> IngestState {
        match self {
            IngestOutcome::Committed(_) => IngestState::Committed,
            IngestOutcome::Inconsistent { .. } => IngestState::Inconsistent,
        }
    }

    pub fn ping(&self) -> &LocationPing {
        match self {
            IngestOutcome::Committed(ping) => ping,
            IngestOutcome::Inconsistent { ping, .. } => ping,
        }
    }
}

#[derive(Clone, Debug)]
pub struct IngestConfig {
    pub remote_timeout: Duration,
}

#[derive(Clone)]
pub struct IngestCoordinator {
    positions: Arc<dyn ProximityRepository>,
    replay: ReplayService,
    history: Arc<dyn HistoryClient>,
    config: IngestConfig,
}

impl IngestCoordinator {
    pub fn new(
        positions: Arc<dyn ProximityRepository>,
        history: Arc<dyn HistoryClient>,
        replay: ReplayService,
        config: IngestConfig,
    ) -> Self {
        Self {
            positions,
            replay,
            history,
            config,
        }
    }

    pub async fn ingest(
        &self,
        input: PingInput,
        request_id: String,
        correlation_id: String,
    ) -> DomainResult<IngestOutcome> {
        // The timestamp is minted once so a replay carries the same identity.
        let ping = LocationPing::new(input.username, input.latitude, input.longitude, now_ms())?;
        log_state(&ping, IngestState::Validated);

        self.positions
            .upsert_position(&UserPosition::from(&ping))
            .await
            .inspect_err(|err| {
                tracing::error!(
                    username = %ping.username,
                    error = %err,
                    "local write failed; nothing persisted"
                );
            })?;
        log_state(&ping, IngestState::LocalCommitted);

        // Detached so that dropping this future (client gone) cannot stop the remote leg.
        let remote_leg = tokio::spawn(remote_leg(
            self.history.clone(),
            self.replay.clone(),
            self.config.remote_timeout,
            ping,
            request_id,
            correlation_id,
        ));
        match remote_leg.await {
            Ok(outcome) => Ok(outcome),
            Err(join_err) => Err(RemoteCallError::Unavailable(format!(
                "remote leg aborted: {join_err}"
            ))
            .into()),
        }
    }
}

async fn remote_leg(
    history: Arc<dyn HistoryClient>,
    replay: ReplayService,
    remote_timeout: Duration,
    ping: LocationPing,
    request_id: String,
    correlation_id: String,
) -> IngestOutcome {
    let result = match timeout(remote_timeout, history.forward_ping(&ping)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteCallError::Timeout(remote_timeout.as_millis() as u64)),
    };

    let error = match result {
        Ok(()) => {
            log_state(&ping, IngestState::Committed);
            return IngestOutcome::Committed(ping);
        }
        Err(error) => error,
    };

    let replay_job_id = match replay
        .schedule(&ping, request_id.clone(), correlation_id.clone())
        .await
    {
        Ok(job_id) => Some(job_id),
        Err(err) => {
            tracing::error!(
                username = %ping.username,
                recorded_at_ms = ping.recorded_at_ms,
                %request_id,
                error = %err,
                "could not schedule history replay"
            );
            None
        }
    };
    tracing::warn!(
        username = %ping.username,
        recorded_at_ms = ping.recorded_at_ms,
        state = IngestState::Inconsistent.as_str(),
        %correlation_id,
        error = %error,
        replay_scheduled = replay_job_id.is_some(),
        "history write failed after local commit"
    );
    IngestOutcome::Inconsistent {
        ping,
        error,
        replay_job_id,
    }
}

fn log_state(ping: &LocationPing, state: IngestState) {
    tracing::debug!(
        username = %ping.username,
        recorded_at_ms = ping.recorded_at_ms,
        state = state.as_str(),
        "ingest transition"
    );
}
