//! Error responses

use axum::{http::StatusCode, Json};
use outreach_common::Error;
use outreach_core::{CampaignError, IngestError};
use serde::{Deserialize, Serialize};
use tracing::error;

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Handler error: status plus JSON body
pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            message: message.into(),
        }),
    )
}

/// Server-side failures are logged and answered with a generic message
fn respond(status: u16, code: &str, message: String) -> ApiError {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("Request failed: {}", message);
        return error_response(status, code, "Internal server error");
    }
    error_response(status, code, message)
}

pub fn from_error(e: Error) -> ApiError {
    respond(e.status_code(), e.code(), e.to_string())
}

pub fn from_campaign_error(e: CampaignError) -> ApiError {
    respond(e.status_code(), e.code(), e.to_string())
}

pub fn from_ingest_error(e: IngestError) -> ApiError {
    respond(e.status_code(), e.code(), e.to_string())
}
