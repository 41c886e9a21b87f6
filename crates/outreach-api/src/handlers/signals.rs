//! Inbound provider signals

use axum::{
    extract::{Path, State},
    Json,
};
use outreach_core::InboundSignal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{from_error, ApiError};
use crate::state::AppState;

/// Attempts changed by a signal
#[derive(Debug, Serialize, Deserialize)]
pub struct SignalResponse {
    pub applied: usize,
    pub attempt_ids: Vec<Uuid>,
}

/// Apply a delivery, reply, read, invalid-number or status signal
///
/// POST /api/v1/tenants/:tenant_id/signals
pub async fn receive_signal(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(signal): Json<InboundSignal>,
) -> Result<Json<SignalResponse>, ApiError> {
    let touched = state
        .services
        .signals
        .apply(tenant_id, signal)
        .await
        .map_err(from_error)?;

    Ok(Json(SignalResponse {
        applied: touched.len(),
        attempt_ids: touched.into_iter().map(|m| m.id).collect(),
    }))
}
