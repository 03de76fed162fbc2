//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use curation_engine::{Error, PartialFailure, ValidationError};
use serde::Serialize;
use serde_json::Value;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Engine(#[from] Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    /// Report of what a partially failed operation did and did not do
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<Value>,
}

fn engine_status(err: &Error) -> StatusCode {
    match err {
        Error::Validation(
            ValidationError::UnknownCollection(_) | ValidationError::UnknownIndex { .. },
        ) => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Initialization { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::TransactionAbort { .. } => StatusCode::CONFLICT,
        Error::PartialFailure(_) => StatusCode::MULTI_STATUS,
    }
}

fn partial_report(failure: &PartialFailure) -> Option<Value> {
    let report = match failure {
        PartialFailure::Cascade(report) => serde_json::to_value(report),
        PartialFailure::Import(report) => serde_json::to_value(report),
    };
    match report {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::error!("Could not serialize failure report: {}", e);
            None
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, report) = match &self {
            AppError::Engine(e) => {
                let status = engine_status(e);
                if status.is_server_error() {
                    tracing::error!("Engine error: {}", e);
                } else {
                    tracing::warn!("Engine error: {}", e);
                }
                let report = match e {
                    Error::PartialFailure(failure) => partial_report(failure),
                    _ => None,
                };
                (status, report)
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, None),
        };

        let body = Json(ErrorResponse {
            error: self.to_string(),
            report,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
