use axum::{Json, http::StatusCode, response::IntoResponse};
use geotrail_domain::error::DomainError;
use geotrail_domain::ports::history::RemoteCallError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage unavailable")]
    StorageUnavailable,
    #[error("history service call failed: {0}")]
    RemoteCallFailed(String),
    /// Local projection was written; the history write is pending replay.
    #[error("location stored locally but history update is pending: {0}")]
    PartialWrite(String),
    #[error("internal error")]
    Internal,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::StorageUnavailable
            | ApiError::RemoteCallFailed(_)
            | ApiError::PartialWrite(_)
            | ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::NotFound => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::StorageUnavailable => "storage_unavailable",
            ApiError::RemoteCallFailed(_) => "remote_call_failed",
            ApiError::PartialWrite(_) => "partial_write",
            ApiError::Internal => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let message = self.to_string();
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.error_code(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub fn map_domain_error(err: DomainError) -> ApiError {
    match err {
        DomainError::Validation(message) => ApiError::Validation(message),
        DomainError::Conflict(message) => ApiError::Conflict(message),
        DomainError::Storage(err) => {
            tracing::error!(error = %err, "storage failure");
            ApiError::StorageUnavailable
        }
        DomainError::Remote(err) => map_remote_error(err),
    }
}

/// A 4xx from the history service is the caller's fault and keeps its status class.
pub fn map_remote_error(err: RemoteCallError) -> ApiError {
    match err {
        RemoteCallError::Rejected { status, message } if status == 409 => {
            ApiError::Conflict(message)
        }
        RemoteCallError::Rejected { status, message } if (400..500).contains(&status) => {
            ApiError::Validation(message)
        }
        RemoteCallError::InvalidRequest(message) => ApiError::Validation(message),
        other => {
            tracing::warn!(kind = other.kind(), error = %other, "history call failed");
            ApiError::RemoteCallFailed(other.to_string())
        }
    }
}
