//! Contact and campaign membership repository

use super::db_error;
use crate::db::DatabasePool;
use crate::models::{CampaignContact, Contact, ContactAttribute, PendingCampaignContact};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_common::types::{Attribute, CampaignId, ContactId, TenantId};
use outreach_common::Result;
use std::collections::HashMap;
use uuid::Uuid;

/// Contact repository trait
#[async_trait]
pub trait ContactRepository: Send + Sync {
    /// Create the contact, or rename it when a different name is supplied
    async fn upsert(&self, tenant_id: TenantId, phone: &str, name: Option<&str>)
        -> Result<Contact>;

    /// Replace the contact's attribute values for one campaign
    async fn set_attributes(
        &self,
        contact_id: ContactId,
        campaign_id: CampaignId,
        attributes: &[Attribute],
    ) -> Result<()>;

    /// Link a contact to a campaign. Returns `false` when already linked.
    async fn add_to_campaign(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
        hash: &str,
    ) -> Result<bool>;

    async fn count_campaign_contacts(&self, campaign_id: CampaignId) -> Result<i64>;

    /// Members not yet sent to, in insertion order, with their attribute values
    async fn pending_for_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<PendingCampaignContact>>;

    async fn mark_delivered(&self, campaign_contact_id: Uuid, at: DateTime<Utc>) -> Result<()>;
    async fn mark_received_by_hash(&self, hash: &str, at: DateTime<Utc>) -> Result<bool>;
    async fn mark_invalid_by_hash(&self, hash: &str) -> Result<bool>;
    async fn find_by_hash(&self, hash: &str) -> Result<Option<CampaignContact>>;
}

/// Database contact repository
pub struct DbContactRepository {
    pool: DatabasePool,
}

impl DbContactRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContactRepository for DbContactRepository {
    async fn upsert(
        &self,
        tenant_id: TenantId,
        phone: &str,
        name: Option<&str>,
    ) -> Result<Contact> {
        sqlx::query_as::<_, Contact>(
            r#"
            INSERT INTO contacts (id, tenant_id, phone, name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, phone) DO UPDATE SET
                name = COALESCE(EXCLUDED.name, contacts.name),
                updated_at = CASE
                    WHEN EXCLUDED.name IS DISTINCT FROM contacts.name AND EXCLUDED.name IS NOT NULL
                    THEN NOW()
                    ELSE contacts.updated_at
                END
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(tenant_id)
        .bind(phone)
        .bind(name)
        .fetch_one(self.pool.pool())
        .await
        .map_err(db_error)
    }

    async fn set_attributes(
        &self,
        contact_id: ContactId,
        campaign_id: CampaignId,
        attributes: &[Attribute],
    ) -> Result<()> {
        let mut tx = self.pool.pool().begin().await.map_err(db_error)?;

        for attribute in attributes {
            sqlx::query(
                r#"
                INSERT INTO contact_attributes (contact_id, campaign_id, name, value)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (contact_id, campaign_id, name) DO UPDATE SET value = EXCLUDED.value
                "#,
            )
            .bind(contact_id)
            .bind(campaign_id)
            .bind(&attribute.name)
            .bind(&attribute.value)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)
    }

    async fn add_to_campaign(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
        hash: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO campaign_contacts (id, campaign_id, contact_id, hash)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (contact_id, campaign_id) DO NOTHING
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(campaign_id)
        .bind(contact_id)
        .bind(hash)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn count_campaign_contacts(&self, campaign_id: CampaignId) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM campaign_contacts WHERE campaign_id = $1")
                .bind(campaign_id)
                .fetch_one(self.pool.pool())
                .await
                .map_err(db_error)?;
        Ok(count.0)
    }

    async fn pending_for_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<PendingCampaignContact>> {
        let members = sqlx::query_as::<_, CampaignContact>(
            r#"
            SELECT * FROM campaign_contacts
            WHERE campaign_id = $1 AND delivered_at IS NULL AND invalid = false
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;

        if members.is_empty() {
            return Ok(Vec::new());
        }

        let contact_ids: Vec<ContactId> = members.iter().map(|m| m.contact_id).collect();

        let contacts: HashMap<ContactId, Contact> =
            sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = ANY($1)")
                .bind(&contact_ids)
                .fetch_all(self.pool.pool())
                .await
                .map_err(db_error)?
                .into_iter()
                .map(|c| (c.id, c))
                .collect();

        let mut attributes: HashMap<ContactId, Vec<ContactAttribute>> = HashMap::new();
        let rows = sqlx::query_as::<_, ContactAttribute>(
            "SELECT * FROM contact_attributes WHERE campaign_id = $1 AND contact_id = ANY($2)",
        )
        .bind(campaign_id)
        .bind(&contact_ids)
        .fetch_all(self.pool.pool())
        .await
        .map_err(db_error)?;
        for row in rows {
            attributes.entry(row.contact_id).or_default().push(row);
        }

        Ok(members
            .into_iter()
            .filter_map(|member| {
                let contact = contacts.get(&member.contact_id)?.clone();
                let attributes = attributes.remove(&member.contact_id).unwrap_or_default();
                Some(PendingCampaignContact {
                    campaign_contact: member,
                    contact,
                    attributes,
                })
            })
            .collect())
    }

    async fn mark_delivered(&self, campaign_contact_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE campaign_contacts SET delivered_at = $2 WHERE id = $1")
            .bind(campaign_contact_id)
            .bind(at)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn mark_received_by_hash(&self, hash: &str, at: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE campaign_contacts SET received_at = $2 WHERE hash = $1 AND received_at IS NULL",
        )
        .bind(hash)
        .bind(at)
        .execute(self.pool.pool())
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_invalid_by_hash(&self, hash: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE campaign_contacts SET invalid = true WHERE hash = $1")
            .bind(hash)
            .execute(self.pool.pool())
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<CampaignContact>> {
        sqlx::query_as::<_, CampaignContact>("SELECT * FROM campaign_contacts WHERE hash = $1")
            .bind(hash)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(db_error)
    }
}
