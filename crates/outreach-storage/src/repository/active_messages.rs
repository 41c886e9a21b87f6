//! Active message (send attempt) repository

use super::db_error;
use crate::db::DatabasePool;
use crate::models::{
    ActiveMessage, ActiveMessageFilter, ActiveMessageWithStatus, CreateActiveMessage, DeliveryMark,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_common::types::{ActiveMessageId, SendSettingId, StatusId, TenantId};
use outreach_common::Result;
use uuid::Uuid;

/// Active message repository trait
#[async_trait]
pub trait ActiveMessageRepository: Send + Sync {
    async fn create(&self, input: CreateActiveMessage) -> Result<ActiveMessage>;
    async fn get(&self, id: ActiveMessageId) -> Result<Option<ActiveMessage>>;

    /// Latest attempt for a caller-supplied correlation id
    async fn find_by_external_id(
        &self,
        send_setting_id: SendSettingId,
        external_id: &str,
    ) -> Result<Option<ActiveMessage>>;

    /// Point the latest error-free attempt of a conversation at a new status.
    ///
    /// Returns the number of rows changed; attempts carrying a message error
    /// are never touched.
    async fn update_status_by_conversation(
        &self,
        conversation_id: &str,
        tenant_id: TenantId,
        status_id: StatusId,
        at: DateTime<Utc>,
    ) -> Result<u64>;

    /// The error-free attempt of a conversation currently at `status_id`
    async fn find_by_conversation_and_status(
        &self,
        conversation_id: &str,
        status_id: StatusId,
    ) -> Result<Option<ActiveMessage>>;

    /// Mark every attempt of a conversation as sent to an invalid number
    async fn mark_invalid(
        &self,
        conversation_id: &str,
        status_id: StatusId,
        message_error: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActiveMessage>>;

    /// Stamp a delivery timestamp once.
    ///
    /// Only matches an attempt on `channel_id` whose column is still null.
    async fn mark_delivery(
        &self,
        id: ActiveMessageId,
        channel_id: &str,
        mark: DeliveryMark,
        at: DateTime<Utc>,
    ) -> Result<Option<ActiveMessage>>;

    async fn list_by_setting(
        &self,
        tenant_id: TenantId,
        send_setting_id: SendSettingId,
        filter: &ActiveMessageFilter,
    ) -> Result<Vec<ActiveMessageWithStatus>>;
}

/// Database active message repository
pub struct DbActiveMessageRepository {
    pool: DatabasePool,
}

impl DbActiveMessageRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ActiveMessageRepository for DbActiveMessageRepository {
    async fn create(&self, input: CreateActiveMessage) -> Result<ActiveMessage> {
        let id = Uuid::now_v7();
        let now = Utc::now();
        let status_changed_at = input.status_id.map(|_| now);

        sqlx::query_as::<_, ActiveMessage>(
            r#"
            INSERT INTO active_messages (
                id, tenant_id, send_setting_id, conversation_id, channel_id, phone,
                external_id, status_id, message_error, campaign_id, created_at,
                status_changed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(input.tenant_id)
        .bind(input.send_setting_id)
        .bind(&input.conversation_id)
        .bind(&input.channel_id)
        .bind(&input.phone)
        .bind(&input.external_id)
        .bind(input.status_id)
        .bind(&input.message_error)
        .bind(input.campaign_id)
        .bind(now)
        .bind(status_changed_at)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn get(&self, id: ActiveMessageId) -> Result<Option<ActiveMessage>> {
        sqlx::query_as::<_, ActiveMessage>("SELECT * FROM active_messages WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn find_by_external_id(
        &self,
        send_setting_id: SendSettingId,
        external_id: &str,
    ) -> Result<Option<ActiveMessage>> {
        sqlx::query_as::<_, ActiveMessage>(
            r#"
            SELECT * FROM active_messages
            WHERE send_setting_id = $1 AND external_id = $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(send_setting_id)
        .bind(external_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn update_status_by_conversation(
        &self,
        conversation_id: &str,
        tenant_id: TenantId,
        status_id: StatusId,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE active_messages SET status_id = $3, status_changed_at = $4
            WHERE id = (
                SELECT id FROM active_messages
                WHERE conversation_id = $1 AND tenant_id = $2 AND message_error IS NULL
                ORDER BY created_at DESC
                LIMIT 1
            )
            "#,
        )
        .bind(conversation_id)
        .bind(tenant_id)
        .bind(status_id)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    async fn find_by_conversation_and_status(
        &self,
        conversation_id: &str,
        status_id: StatusId,
    ) -> Result<Option<ActiveMessage>> {
        sqlx::query_as::<_, ActiveMessage>(
            r#"
            SELECT * FROM active_messages
            WHERE conversation_id = $1 AND status_id = $2 AND message_error IS NULL
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(conversation_id)
        .bind(status_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn mark_invalid(
        &self,
        conversation_id: &str,
        status_id: StatusId,
        message_error: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActiveMessage>> {
        sqlx::query_as::<_, ActiveMessage>(
            r#"
            UPDATE active_messages
            SET status_id = $2, message_error = $3, status_changed_at = $4
            WHERE conversation_id = $1
            RETURNING *
            "#,
        )
        .bind(conversation_id)
        .bind(status_id)
        .bind(message_error)
        .bind(at)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn mark_delivery(
        &self,
        id: ActiveMessageId,
        channel_id: &str,
        mark: DeliveryMark,
        at: DateTime<Utc>,
    ) -> Result<Option<ActiveMessage>> {
        let column = mark.column();
        let sql = format!(
            "UPDATE active_messages SET {column} = $3 \
             WHERE id = $1 AND channel_id = $2 AND {column} IS NULL \
             RETURNING *"
        );

        sqlx::query_as::<_, ActiveMessage>(&sql)
            .bind(id)
            .bind(channel_id)
            .bind(at)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }

    async fn list_by_setting(
        &self,
        tenant_id: TenantId,
        send_setting_id: SendSettingId,
        filter: &ActiveMessageFilter,
    ) -> Result<Vec<ActiveMessageWithStatus>> {
        sqlx::query_as::<_, ActiveMessageWithStatus>(
            r#"
            SELECT m.*, s.code AS status_code, s.name AS status_name
            FROM active_messages m
            LEFT JOIN statuses s ON s.id = m.status_id
            WHERE m.tenant_id = $1
              AND m.send_setting_id = $2
              AND ($3::text IS NULL OR m.external_id = $3)
              AND ($4::timestamptz IS NULL OR m.created_at >= $4)
              AND ($5::timestamptz IS NULL OR m.created_at <= $5)
              AND ($6::timestamptz IS NULL OR m.status_changed_at > $6)
            ORDER BY m.created_at DESC
            LIMIT $7 OFFSET $8
            "#,
        )
        .bind(tenant_id)
        .bind(send_setting_id)
        .bind(&filter.external_id)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(filter.status_changed_after)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)
    }
}
