//! Single-send handler

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use outreach_core::{Accepted, SendCommand};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{from_error, ApiError};
use crate::state::AppState;

/// Send acceptance response
#[derive(Debug, Serialize, Deserialize)]
pub struct SendResponse {
    pub external_id: String,
    /// "queued", "in_flight" or "existing"
    pub status: String,
    /// Attempt already recorded under the external id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_id: Option<Uuid>,
}

/// Accept a send for asynchronous dispatch
///
/// POST /api/v1/tenants/:tenant_id/send
///
/// Answers 202 once queued or while the same external id is still queued;
/// 200 when the external id already has an attempt.
pub async fn send(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(command): Json<SendCommand>,
) -> Result<(StatusCode, Json<SendResponse>), ApiError> {
    let accepted = state
        .services
        .send
        .submit(tenant_id, command)
        .await
        .map_err(from_error)?;

    Ok(match accepted {
        Accepted::Queued { external_id } => (
            StatusCode::ACCEPTED,
            Json(SendResponse {
                external_id,
                status: "queued".to_string(),
                attempt_id: None,
            }),
        ),
        Accepted::InFlight { external_id } => (
            StatusCode::ACCEPTED,
            Json(SendResponse {
                external_id,
                status: "in_flight".to_string(),
                attempt_id: None,
            }),
        ),
        Accepted::Existing { attempt } => (
            StatusCode::OK,
            Json(SendResponse {
                external_id: attempt.external_id,
                status: "existing".to_string(),
                attempt_id: Some(attempt.id),
            }),
        ),
    })
}
