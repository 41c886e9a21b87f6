//! Sent message listing

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use outreach_core::MessageQuery;
use outreach_storage::models::ActiveMessageWithStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{from_error, ApiError};
use crate::state::AppState;

/// Query parameters for listing messages
#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub api_token: String,
    pub external_id: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub status_changed_after: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Message list response
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageListResponse {
    pub data: Vec<MessageResponse>,
}

/// One send attempt with its status
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub external_id: String,
    pub phone: String,
    pub conversation_id: Option<String>,
    pub channel_id: Option<String>,
    pub campaign_id: Option<Uuid>,
    pub status_code: Option<i32>,
    pub status_name: Option<String>,
    pub message_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl From<ActiveMessageWithStatus> for MessageResponse {
    fn from(row: ActiveMessageWithStatus) -> Self {
        let m = row.message;
        Self {
            id: m.id,
            external_id: m.external_id,
            phone: m.phone,
            conversation_id: m.conversation_id,
            channel_id: m.channel_id,
            campaign_id: m.campaign_id,
            status_code: row.status_code,
            status_name: row.status_name,
            message_error: m.message_error,
            created_at: m.created_at,
            received_at: m.received_at,
            answered_at: m.answered_at,
            read_at: m.read_at,
            status_changed_at: m.status_changed_at,
        }
    }
}

/// List the messages sent through one send setting
///
/// GET /api/v1/tenants/:tenant_id/messages
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<Json<MessageListResponse>, ApiError> {
    let rows = state
        .services
        .status
        .list_by_tenant_and_token(
            tenant_id,
            &query.api_token,
            MessageQuery {
                external_id: query.external_id,
                created_from: query.created_from,
                created_to: query.created_to,
                status_changed_after: query.status_changed_after,
                limit: query.limit,
                offset: query.offset,
            },
        )
        .await
        .map_err(from_error)?;

    Ok(Json(MessageListResponse {
        data: rows.into_iter().map(MessageResponse::from).collect(),
    }))
}
