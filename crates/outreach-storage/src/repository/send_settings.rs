//! Send setting repository

use super::db_error;
use crate::db::DatabasePool;
use crate::models::{CreateSendSetting, SendSetting};
use async_trait::async_trait;
use outreach_common::types::{SendSettingId, TenantId};
use outreach_common::{Error, Result};
use uuid::Uuid;

/// Send setting repository trait
#[async_trait]
pub trait SendSettingRepository: Send + Sync {
    async fn create(&self, input: CreateSendSetting) -> Result<SendSetting>;
    async fn get(&self, id: SendSettingId) -> Result<Option<SendSetting>>;
    async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: SendSettingId,
    ) -> Result<Option<SendSetting>>;
    async fn find_by_api_token(&self, api_token: &str) -> Result<Option<SendSetting>>;
    async fn set_enabled(&self, id: SendSettingId, enabled: bool) -> Result<()>;
}

/// Database send setting repository
pub struct DbSendSettingRepository {
    pool: DatabasePool,
}

impl DbSendSettingRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SendSettingRepository for DbSendSettingRepository {
    async fn create(&self, input: CreateSendSetting) -> Result<SendSetting> {
        let id = Uuid::now_v7();
        let tags = serde_json::to_value(&input.tags).unwrap_or_default();

        sqlx::query_as::<_, SendSetting>(
            r#"
            INSERT INTO send_settings (
                id, tenant_id, name, channel_token, api_token, enabled, callback_url,
                expiration_value, expiration_unit, suspend_value, suspend_unit,
                send_message_to_open_conversation, objective, action, template_id,
                team_id, tags
            )
            VALUES ($1, $2, $3, $4, $5, true, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(&input.name)
        .bind(&input.channel_token)
        .bind(&input.api_token)
        .bind(&input.callback_url)
        .bind(input.expiration.map(|p| p.value))
        .bind(input.expiration.map(|p| p.unit.to_string()))
        .bind(input.suspend.map(|p| p.value))
        .bind(input.suspend.map(|p| p.unit.to_string()))
        .bind(input.send_message_to_open_conversation)
        .bind(&input.objective)
        .bind(&input.action)
        .bind(&input.template_id)
        .bind(&input.team_id)
        .bind(&tags)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn get(&self, id: SendSettingId) -> Result<Option<SendSetting>> {
        sqlx::query_as::<_, SendSetting>("SELECT * FROM send_settings WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: SendSettingId,
    ) -> Result<Option<SendSetting>> {
        sqlx::query_as::<_, SendSetting>(
            "SELECT * FROM send_settings WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn find_by_api_token(&self, api_token: &str) -> Result<Option<SendSetting>> {
        sqlx::query_as::<_, SendSetting>("SELECT * FROM send_settings WHERE api_token = $1")
            .bind(api_token)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn set_enabled(&self, id: SendSettingId, enabled: bool) -> Result<()> {
        let result = sqlx::query(
            "UPDATE send_settings SET enabled = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(enabled)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Send setting {} not found", id)));
        }
        Ok(())
    }
}
