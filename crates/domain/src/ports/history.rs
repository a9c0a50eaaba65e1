use thiserror::Error;

use super::BoxFuture;
use crate::locations::{LocationPing, TimeWindow};
use crate::travel::TravelDistance;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteCallError {
    #[error("history service call timed out after {0}ms")]
    Timeout(u64),
    #[error("history service unavailable: {0}")]
    Unavailable(String),
    #[error("history service rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("history service returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("history request could not be built: {0}")]
    InvalidRequest(String),
}

impl RemoteCallError {
    pub fn kind(&self) -> &'static str {
        match self {
            RemoteCallError::Timeout(_) => "timeout",
            RemoteCallError::Unavailable(_) => "unavailable",
            RemoteCallError::Rejected { .. } => "rejected",
            RemoteCallError::InvalidResponse(_) => "invalid_response",
            RemoteCallError::InvalidRequest(_) => "invalid_request",
        }
    }
}

/// Client side of the history service as seen from the management service.
pub trait HistoryClient: Send + Sync {
    fn forward_ping(&self, ping: &LocationPing) -> BoxFuture<'_, Result<(), RemoteCallError>>;

    fn travel_distance(
        &self,
        username: &str,
        window: TimeWindow,
    ) -> BoxFuture<'_, Result<TravelDistance, RemoteCallError>>;
}
