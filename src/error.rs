//! Service-wide error type and its HTTP rendering.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use sea_orm::DbErr;
use serde_json::json;
use thiserror::Error;

use crate::customization::RenderError;
use crate::entity::document_analysis::AnalysisStatus;
use crate::storage::StorageError;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Everything a service operation can fail with.
///
/// Each variant maps to one HTTP status; the message becomes the `error`
/// field of the JSON body.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{kind} `{id}` not found")]
    NotFound { kind: &'static str, id: String },

    #[error("session `{0}` has expired")]
    SessionExpired(String),

    #[error("file of {size} bytes exceeds the {limit} byte limit")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("storage quota exceeded: {used} bytes used, {requested} requested, {limit} allowed")]
    QuotaExceeded { used: u64, requested: u64, limit: u64 },

    #[error("rate limit exceeded, try again later")]
    RateLimited,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("cannot move analysis from {from} to {to}")]
    InvalidTransition {
        from: AnalysisStatus,
        to: AnalysisStatus,
    },

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session error: {0}")]
    Session(#[from] tower_sessions::session::Error),
}

impl ServiceError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        ServiceError::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::Database(_)
            | ServiceError::Storage(_)
            | ServiceError::Serialization(_)
            | ServiceError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::NotFound { .. } => StatusCode::NOT_FOUND,
            ServiceError::SessionExpired(_) => StatusCode::GONE,
            ServiceError::FileTooLarge { .. } | ServiceError::QuotaExceeded { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            ServiceError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::InvalidTransition { .. } => StatusCode::CONFLICT,
            ServiceError::Render(_) => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
