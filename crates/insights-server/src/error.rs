//! API error types for the insights server.
//!
//! Maps `insights-core` domain errors to HTTP status codes and JSON error
//! bodies: validation failures are client errors, storage/queue
//! failures are server errors, and admission-level backpressure is
//! surfaced with a `Retry-After` header rather than a bare 503.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use insights_core::error::{AdmissionError, StorageError, ValidationError};
use serde_json::json;

/// API error type for route handlers.
pub enum ApiError {
    /// The request body failed validation.
    Validation(ValidationError),
    /// A bulk request's size fell outside the accepted range (spec §6:
    /// `POST /api/v1/conversations/bulk` answers this with 413, distinct
    /// from the 400 a malformed element gets).
    BatchSizeOutOfRange(ValidationError),
    /// A storage operation failed.
    Storage(StorageError),
    /// A query parameter was malformed (e.g. an unknown trend window).
    BadRequest(String),
    /// The work queue rejected every item in this request; retry later.
    QueueFull { retry_after_secs: u64 },
}

impl From<AdmissionError> for ApiError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::Validation(e @ ValidationError::BatchSizeOutOfRange { .. }) => {
                Self::BatchSizeOutOfRange(e)
            }
            AdmissionError::Validation(e) => Self::Validation(e),
            AdmissionError::Storage(e) => Self::Storage(e),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(e) => {
                (StatusCode::BAD_REQUEST, axum::Json(json!({ "error": e.to_string() })))
                    .into_response()
            }
            Self::BatchSizeOutOfRange(e) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                axum::Json(json!({ "error": e.to_string() })),
            )
                .into_response(),
            Self::Storage(e) => {
                tracing::error!(error = %e, "storage error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    axum::Json(json!({ "error": e.to_string() })),
                )
                    .into_response()
            }
            Self::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, axum::Json(json!({ "error": msg }))).into_response()
            }
            Self::QueueFull { retry_after_secs } => {
                let mut response = (
                    StatusCode::SERVICE_UNAVAILABLE,
                    axum::Json(json!({ "error": "queue_full" })),
                )
                    .into_response();
                response.headers_mut().insert(
                    axum::http::header::RETRY_AFTER,
                    retry_after_secs.into(),
                );
                response
            }
        }
    }
}
