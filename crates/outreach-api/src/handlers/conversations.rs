//! Conversation lookups

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use outreach_common::types::PhoneNumber;
use outreach_core::gateway::ConversationStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{error_response, from_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExistsQuery {
    pub phone: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExistsResponse {
    pub exists: bool,
}

/// Whether the tenant has an open conversation with the phone, under any
/// of its spellings
///
/// GET /api/v1/tenants/:tenant_id/conversations/exists
pub async fn conversation_exists(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ExistsQuery>,
) -> Result<Json<ExistsResponse>, ApiError> {
    let phone = PhoneNumber::parse(&query.phone).ok_or_else(|| {
        error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "VALIDATION_ERROR",
            format!("Invalid phone number: {}", query.phone),
        )
    })?;

    for variant in phone.variants() {
        let open = state
            .services
            .conversations
            .has_open_conversation(&variant, tenant_id)
            .await
            .map_err(from_error)?;
        if open {
            return Ok(Json(ExistsResponse { exists: true }));
        }
    }

    Ok(Json(ExistsResponse { exists: false }))
}
