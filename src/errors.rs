use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error body returned by the HTTP surface
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Unauthorized", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Customer, territory or pricing lookup failed in a way a later attempt may fix.
    #[error("Resolution error: {0}")]
    ResolutionError(String),

    /// Malformed or unmapped payload. Needs manual review.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Network failure, rate limit or 5xx from the storefront.
    #[error("Transient upstream error: {0}")]
    TransientUpstream(String),

    /// A finalized document would have to be rewritten.
    #[error("State conflict: {0}")]
    StateConflict(String),

    #[error("Arithmetic invariant violated: {0}")]
    ArithmeticInvariantViolation(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(Uuid),

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(
        #[from]
        #[serde(skip)]
        anyhow::Error,
    ),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl From<crate::message_queue::MessageQueueError> for ServiceError {
    fn from(err: crate::message_queue::MessageQueueError) -> Self {
        ServiceError::QueueError(err.to_string())
    }
}

impl ServiceError {
    /// Convenience constructor for wrapping string-based database errors.
    pub fn database_error_message(message: impl Into<String>) -> Self {
        ServiceError::DatabaseError(DbErr::Custom(message.into()))
    }

    /// Whether a later attempt of the same order can succeed without manual action.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ResolutionError(_)
            | Self::TransientUpstream(_)
            | Self::ConcurrentModification(_)
            | Self::DatabaseError(_)
            | Self::QueueError(_) => true,
            Self::NotFound(_)
            | Self::ValidationError(_)
            | Self::StateConflict(_)
            | Self::ArithmeticInvariantViolation(_)
            | Self::ExternalApiError(_)
            | Self::Unauthorized(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => false,
        }
    }

    /// Short machine label used for log fields and metric tags.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DatabaseError(_) => "database",
            Self::NotFound(_) => "not_found",
            Self::ResolutionError(_) => "resolution",
            Self::ValidationError(_) => "validation",
            Self::TransientUpstream(_) => "transient_upstream",
            Self::StateConflict(_) => "state_conflict",
            Self::ArithmeticInvariantViolation(_) => "arithmetic_invariant",
            Self::ConcurrentModification(_) => "concurrent_modification",
            Self::ExternalApiError(_) => "external_api",
            Self::Unauthorized(_) => "unauthorized",
            Self::QueueError(_) => "queue",
            Self::SerializationError(_) => "serialization",
            Self::InternalError(_) | Self::Other(_) => "internal",
        }
    }

    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::StateConflict(_) | Self::ConcurrentModification(_) => StatusCode::CONFLICT,
            Self::ArithmeticInvariantViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ResolutionError(_) | Self::TransientUpstream(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::ExternalApiError(_) => StatusCode::BAD_GATEWAY,
            Self::QueueError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::QueueError(_)
            | Self::SerializationError(_)
            | Self::InternalError(_)
            | Self::Other(_) => "Internal server error".to_string(),
            Self::ConcurrentModification(id) => {
                format!("Concurrent modification for ID {}", id)
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
