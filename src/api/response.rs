//! Structured error responses
//!
//! Every failed API call answers with `{error, code, details?}` where `code`
//! repeats the HTTP status.

use crate::error::OracleError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error body returned by the coordinator and worker HTTP surfaces
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error: impl Into<String>, code: u16, details: Option<String>) -> Self {
        Self {
            error: error.into(),
            code,
            details,
        }
    }

    pub fn invalid_request(details: impl Into<String>) -> Self {
        Self::new("invalid request", 400, Some(details.into()))
    }

    pub fn no_workers_available() -> Self {
        Self::new(
            "no workers available",
            503,
            Some("no workers are currently available to process the request".to_string()),
        )
    }

    pub fn worker_timeout() -> Self {
        Self::new(
            "worker timeout",
            504,
            Some("no worker responded within the timeout period".to_string()),
        )
    }

    /// Outcomes arrived but every one of them failed
    pub fn no_successful_responses(note: impl Into<String>) -> Self {
        Self::new("no successful responses", 502, Some(note.into()))
    }

    pub fn message_queue_unavailable(details: impl Into<String>) -> Self {
        Self::new("message queue unavailable", 503, Some(details.into()))
    }

    pub fn duplicate_request(request_id: &str) -> Self {
        Self::new(
            "duplicate request",
            409,
            Some(format!("request {} is already in flight", request_id)),
        )
    }

    pub fn unsupported(details: impl Into<String>) -> Self {
        Self::new("unsupported", 400, Some(details.into()))
    }

    pub fn internal(details: impl Into<String>) -> Self {
        Self::new("internal server error", 500, Some(details.into()))
    }

    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<OracleError> for ApiError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::InvalidRequest(details) => ApiError::invalid_request(details),
            OracleError::NoWorkersAvailable => ApiError::no_workers_available(),
            OracleError::DuplicateRequest(id) => ApiError::duplicate_request(&id),
            OracleError::Unsupported(details) => ApiError::unsupported(details),
            OracleError::BusUnavailable(details) => ApiError::message_queue_unavailable(details),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}
