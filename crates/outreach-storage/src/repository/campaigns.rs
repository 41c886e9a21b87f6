//! Campaign repository

use super::db_error;
use crate::db::DatabasePool;
use crate::models::{Campaign, CampaignAttribute, CampaignProgress, CampaignStatus, CreateCampaign};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_common::types::{CampaignId, TenantId};
use outreach_common::Result;
use uuid::Uuid;

/// Campaign repository trait
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign>;
    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn get_by_tenant(&self, tenant_id: TenantId, id: CampaignId)
        -> Result<Option<Campaign>>;
    async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>>;

    /// Template variables defined by the campaign
    async fn attributes(&self, campaign_id: CampaignId) -> Result<Vec<CampaignAttribute>>;

    /// Move to `status`; stamps `started_at` on the first run and `ended_at`
    /// on completion
    async fn update_status(&self, id: CampaignId, status: CampaignStatus)
        -> Result<Option<Campaign>>;

    async fn set_scheduled(&self, id: CampaignId, scheduled_at: Option<DateTime<Utc>>)
        -> Result<()>;

    async fn update_progress(&self, id: CampaignId, progress: CampaignProgress) -> Result<()>;

    /// Campaigns awaiting send whose scheduled start has passed
    async fn scheduled_ready(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>>;
}

/// Database campaign repository
#[derive(Clone)]
pub struct DbCampaignRepository {
    pool: DatabasePool,
}

impl DbCampaignRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignRepository for DbCampaignRepository {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let id = Uuid::now_v7();
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (
                id, tenant_id, name, send_setting_id, template_id, status,
                send_interval_secs, scheduled_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(input.send_setting_id)
        .bind(&input.template_id)
        .bind(CampaignStatus::Draft.to_string())
        .bind(input.send_interval_secs.unwrap_or(0))
        .bind(input.scheduled_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        for (name, label) in &input.attributes {
            sqlx::query(
                r#"
                INSERT INTO campaign_attributes (id, campaign_id, name, label)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (campaign_id, name) DO UPDATE SET label = EXCLUDED.label
                "#,
            )
            .bind(Uuid::now_v7())
            .bind(id)
            .bind(name)
            .bind(label)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        sqlx::query_as::<_, Campaign>("SELECT * FROM campaigns WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE tenant_id = $1 AND ($2::text IS NULL OR status = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(status.map(|s| s.to_string()))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn attributes(&self, campaign_id: CampaignId) -> Result<Vec<CampaignAttribute>> {
        sqlx::query_as::<_, CampaignAttribute>(
            "SELECT * FROM campaign_attributes WHERE campaign_id = $1 ORDER BY name",
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn update_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let now = Utc::now();
        let started_at = (status == CampaignStatus::Running).then_some(now);
        let ended_at = (status == CampaignStatus::FinishedComplete).then_some(now);

        sqlx::query_as::<_, Campaign>(
            r#"
            UPDATE campaigns SET
                status = $2,
                started_at = COALESCE(started_at, $3),
                ended_at = COALESCE($4, ended_at),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(status.to_string())
        .bind(started_at)
        .bind(ended_at)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn set_scheduled(
        &self,
        id: CampaignId,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE campaigns SET scheduled_at = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(scheduled_at)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn update_progress(&self, id: CampaignId, progress: CampaignProgress) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns SET
                processing_total = $2,
                processed_total = $3,
                finished = $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(progress.processing_total)
        .bind(progress.processed_total)
        .bind(progress.finished)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn scheduled_ready(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        sqlx::query_as::<_, Campaign>(
            r#"
            SELECT * FROM campaigns
            WHERE status = $1
              AND scheduled_at IS NOT NULL
              AND scheduled_at <= $2
            ORDER BY scheduled_at ASC
            "#,
        )
        .bind(CampaignStatus::AwaitingSend.to_string())
        .bind(now)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }
}
