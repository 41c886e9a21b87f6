//! Campaign handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use outreach_core::{ContactRow, IngestReceipt};
use outreach_storage::models::{Campaign, CampaignProgress, CampaignStatus, CreateCampaign};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{from_campaign_error, from_ingest_error, ApiError};
use crate::state::AppState;

/// Query parameters for listing campaigns
#[derive(Debug, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Campaign list response
#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignListResponse {
    pub data: Vec<CampaignResponse>,
    pub limit: i64,
    pub offset: i64,
}

/// Campaign response
#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignResponse {
    pub id: Uuid,
    pub name: String,
    pub send_setting_id: Option<Uuid>,
    pub template_id: Option<String>,
    pub status: String,
    pub send_interval_secs: i32,
    pub processing_total: i64,
    pub processed_total: i64,
    pub finished: bool,
    pub progress_percentage: f64,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Campaign> for CampaignResponse {
    fn from(c: Campaign) -> Self {
        let progress = c.progress_percentage();
        Self {
            id: c.id,
            name: c.name,
            send_setting_id: c.send_setting_id,
            template_id: c.template_id,
            status: c.status,
            send_interval_secs: c.send_interval_secs,
            processing_total: c.processing_total,
            processed_total: c.processed_total,
            finished: c.finished,
            progress_percentage: progress,
            scheduled_at: c.scheduled_at,
            started_at: c.started_at,
            ended_at: c.ended_at,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

/// Template variable declared by a campaign
#[derive(Debug, Serialize, Deserialize)]
pub struct CampaignAttributeInput {
    pub name: String,
    pub label: String,
}

/// Request body for creating a campaign
#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    pub send_setting_id: Option<Uuid>,
    pub template_id: Option<String>,
    pub send_interval_secs: Option<i32>,
    #[serde(default)]
    pub attributes: Vec<CampaignAttributeInput>,
}

/// Request body for starting a campaign
#[derive(Debug, Default, Deserialize)]
pub struct StartCampaignRequest {
    /// Start no earlier than this; only applies to drafts
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Request body for uploading contacts
#[derive(Debug, Deserialize)]
pub struct UploadContactsRequest {
    pub contacts: Vec<ContactRow>,
}

/// List campaigns for a tenant
///
/// GET /api/v1/tenants/:tenant_id/campaigns
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Query(query): Query<ListCampaignsQuery>,
) -> Result<Json<CampaignListResponse>, ApiError> {
    let status = query.status.and_then(|s| s.parse::<CampaignStatus>().ok());

    let campaigns = state
        .services
        .runner
        .list(tenant_id, status, query.limit, query.offset)
        .await
        .map_err(from_campaign_error)?;

    Ok(Json(CampaignListResponse {
        data: campaigns.into_iter().map(CampaignResponse::from).collect(),
        limit: query.limit,
        offset: query.offset,
    }))
}

/// Create a new campaign in draft
///
/// POST /api/v1/tenants/:tenant_id/campaigns
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    Json(input): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    let campaign = state
        .services
        .runner
        .create(CreateCampaign {
            tenant_id,
            name: input.name,
            send_setting_id: input.send_setting_id,
            template_id: input.template_id,
            send_interval_secs: input.send_interval_secs,
            scheduled_at: None,
            attributes: input
                .attributes
                .into_iter()
                .map(|a| (a.name, a.label))
                .collect(),
        })
        .await
        .map_err(from_campaign_error)?;

    Ok((StatusCode::CREATED, Json(CampaignResponse::from(campaign))))
}

/// Get a campaign
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id
pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .services
        .runner
        .get(tenant_id, campaign_id)
        .await
        .map_err(from_campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Start a campaign, or schedule it when `scheduled_at` lies ahead
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/start
pub async fn start_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    body: Option<Json<StartCampaignRequest>>,
) -> Result<(StatusCode, Json<CampaignResponse>), ApiError> {
    let input = body.map(|Json(b)| b).unwrap_or_default();
    let runner = &state.services.runner;

    let mut campaign = runner
        .get(tenant_id, campaign_id)
        .await
        .map_err(from_campaign_error)?;

    if campaign.status_enum() == Some(CampaignStatus::Draft) {
        campaign = runner
            .mark_awaiting_send(tenant_id, campaign_id, input.scheduled_at)
            .await
            .map_err(from_campaign_error)?;
    }

    if campaign.scheduled_at.is_some_and(|at| at > Utc::now()) {
        info!(campaign_id = %campaign_id, "Campaign scheduled");
        return Ok((StatusCode::ACCEPTED, Json(CampaignResponse::from(campaign))));
    }

    let campaign = runner
        .request_start(tenant_id, campaign_id)
        .await
        .map_err(from_campaign_error)?;

    Ok((StatusCode::ACCEPTED, Json(CampaignResponse::from(campaign))))
}

/// Pause a campaign
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/pause
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignResponse>, ApiError> {
    let campaign = state
        .services
        .runner
        .pause(tenant_id, campaign_id)
        .await
        .map_err(from_campaign_error)?;

    Ok(Json(CampaignResponse::from(campaign)))
}

/// Contact import progress
///
/// GET /api/v1/tenants/:tenant_id/campaigns/:campaign_id/progress
pub async fn get_campaign_progress(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<CampaignProgress>, ApiError> {
    let progress = state
        .services
        .runner
        .progress(tenant_id, campaign_id)
        .await
        .map_err(from_campaign_error)?;

    Ok(Json(progress))
}

/// Queue contacts for import and drain them in the background
///
/// POST /api/v1/tenants/:tenant_id/campaigns/:campaign_id/contacts
pub async fn upload_contacts(
    State(state): State<Arc<AppState>>,
    Path((tenant_id, campaign_id)): Path<(Uuid, Uuid)>,
    Json(input): Json<UploadContactsRequest>,
) -> Result<(StatusCode, Json<IngestReceipt>), ApiError> {
    let ingest = state.services.ingest.clone();
    let receipt = ingest
        .enqueue(tenant_id, campaign_id, input.contacts)
        .await
        .map_err(from_ingest_error)?;

    tokio::spawn(async move {
        if let Err(e) = ingest.process_campaign_contact(campaign_id).await {
            warn!(campaign_id = %campaign_id, "Contact import failed: {}", e);
        }
    });

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}
