//! In-memory repositories
//!
//! [`MemoryStore`] implements every repository trait over a single locked
//! state so joins (messages with statuses, campaign members with contacts)
//! behave like their SQL counterparts. Used by tests and local runs without
//! a database.

use crate::models::*;
use crate::repository::{
    ActiveMessageRepository, CampaignRepository, ContactRepository, SendSettingRepository,
    StatusRepository,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_common::types::{
    ActiveMessageId, Attribute, CampaignId, ContactId, GlobalStatus, SendSettingId, StatusId,
    TenantId,
};
use outreach_common::{Error, Result};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct State {
    send_settings: HashMap<SendSettingId, SendSetting>,
    statuses: HashMap<StatusId, Status>,
    active_messages: Vec<ActiveMessage>,
    campaigns: HashMap<CampaignId, Campaign>,
    campaign_attributes: Vec<CampaignAttribute>,
    contacts: HashMap<ContactId, Contact>,
    contact_attributes: Vec<ContactAttribute>,
    campaign_contacts: Vec<CampaignContact>,
}

/// In-memory implementation of all repositories
pub struct MemoryStore {
    state: RwLock<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store seeded with the global statuses
    pub fn new() -> Self {
        let mut state = State::default();
        for status in [
            GlobalStatus::InvalidNumber,
            GlobalStatus::OpenConversation,
            GlobalStatus::ChannelDisabled,
            GlobalStatus::MessageSent,
        ] {
            let row = Status {
                id: Uuid::now_v7(),
                tenant_id: None,
                code: status.code(),
                name: status.to_string(),
                created_at: Utc::now(),
            };
            state.statuses.insert(row.id, row);
        }
        Self {
            state: RwLock::new(state),
        }
    }

    /// Insert a fully built send setting
    pub async fn insert_send_setting(&self, setting: SendSetting) {
        self.state
            .write()
            .await
            .send_settings
            .insert(setting.id, setting);
    }

    /// All recorded attempts, oldest first
    pub async fn active_messages(&self) -> Vec<ActiveMessage> {
        self.state.read().await.active_messages.clone()
    }

    /// All campaign memberships, in insertion order
    pub async fn campaign_contacts(&self) -> Vec<CampaignContact> {
        self.state.read().await.campaign_contacts.clone()
    }

    /// Contact attribute values stored for a campaign
    pub async fn contact_attributes(&self, campaign_id: CampaignId) -> Vec<ContactAttribute> {
        self.state
            .read()
            .await
            .contact_attributes
            .iter()
            .filter(|a| a.campaign_id == campaign_id)
            .cloned()
            .collect()
    }

    /// Contacts of a tenant
    pub async fn contacts(&self, tenant_id: TenantId) -> Vec<Contact> {
        self.state
            .read()
            .await
            .contacts
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

fn policy_columns(policy: Option<outreach_common::types::PolicyDuration>) -> (Option<i64>, Option<String>) {
    match policy {
        Some(p) => (Some(p.value), Some(p.unit.to_string())),
        None => (None, None),
    }
}

#[async_trait]
impl SendSettingRepository for MemoryStore {
    async fn create(&self, input: CreateSendSetting) -> Result<SendSetting> {
        let mut state = self.state.write().await;
        if state
            .send_settings
            .values()
            .any(|s| s.api_token == input.api_token)
        {
            return Err(Error::Database(
                "duplicate key value violates unique constraint on api_token".to_string(),
            ));
        }

        let now = Utc::now();
        let (expiration_value, expiration_unit) = policy_columns(input.expiration);
        let (suspend_value, suspend_unit) = policy_columns(input.suspend);
        let setting = SendSetting {
            id: Uuid::now_v7(),
            tenant_id: input.tenant_id,
            name: input.name,
            channel_token: input.channel_token,
            api_token: input.api_token,
            enabled: true,
            callback_url: input.callback_url,
            expiration_value,
            expiration_unit,
            suspend_value,
            suspend_unit,
            send_message_to_open_conversation: input.send_message_to_open_conversation,
            objective: input.objective,
            action: input.action,
            template_id: input.template_id,
            team_id: input.team_id,
            tags: serde_json::to_value(&input.tags).unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        state.send_settings.insert(setting.id, setting.clone());
        Ok(setting)
    }

    async fn get(&self, id: SendSettingId) -> Result<Option<SendSetting>> {
        Ok(self.state.read().await.send_settings.get(&id).cloned())
    }

    async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: SendSettingId,
    ) -> Result<Option<SendSetting>> {
        Ok(self
            .state
            .read()
            .await
            .send_settings
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_by_api_token(&self, api_token: &str) -> Result<Option<SendSetting>> {
        Ok(self
            .state
            .read()
            .await
            .send_settings
            .values()
            .find(|s| s.api_token == api_token)
            .cloned())
    }

    async fn set_enabled(&self, id: SendSettingId, enabled: bool) -> Result<()> {
        let mut state = self.state.write().await;
        let setting = state
            .send_settings
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Send setting {} not found", id)))?;
        setting.enabled = enabled;
        setting.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl StatusRepository for MemoryStore {
    async fn find_global(&self, status: GlobalStatus) -> Result<Option<Status>> {
        Ok(self
            .state
            .read()
            .await
            .statuses
            .values()
            .find(|s| s.tenant_id.is_none() && s.code == status.code())
            .cloned())
    }

    async fn find_by_tenant(&self, tenant_id: TenantId, code: i32) -> Result<Option<Status>> {
        Ok(self
            .state
            .read()
            .await
            .statuses
            .values()
            .find(|s| s.tenant_id == Some(tenant_id) && s.code == code)
            .cloned())
    }

    async fn get(&self, id: StatusId) -> Result<Option<Status>> {
        Ok(self.state.read().await.statuses.get(&id).cloned())
    }

    async fn create(&self, tenant_id: TenantId, code: i32, name: &str) -> Result<Status> {
        if code < 0 {
            return Err(Error::Validation(
                "Negative status codes are reserved".to_string(),
            ));
        }
        let row = Status {
            id: Uuid::now_v7(),
            tenant_id: Some(tenant_id),
            code,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.state.write().await.statuses.insert(row.id, row.clone());
        Ok(row)
    }
}

#[async_trait]
impl ActiveMessageRepository for MemoryStore {
    async fn create(&self, input: CreateActiveMessage) -> Result<ActiveMessage> {
        let now = Utc::now();
        let message = ActiveMessage {
            id: Uuid::now_v7(),
            tenant_id: input.tenant_id,
            send_setting_id: input.send_setting_id,
            conversation_id: input.conversation_id,
            channel_id: input.channel_id,
            phone: input.phone,
            external_id: input.external_id,
            status_id: input.status_id,
            message_error: input.message_error,
            campaign_id: input.campaign_id,
            created_at: now,
            received_at: None,
            answered_at: None,
            read_at: None,
            status_changed_at: input.status_id.map(|_| now),
        };
        self.state.write().await.active_messages.push(message.clone());
        Ok(message)
    }

    async fn get(&self, id: ActiveMessageId) -> Result<Option<ActiveMessage>> {
        Ok(self
            .state
            .read()
            .await
            .active_messages
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn find_by_external_id(
        &self,
        send_setting_id: SendSettingId,
        external_id: &str,
    ) -> Result<Option<ActiveMessage>> {
        Ok(self
            .state
            .read()
            .await
            .active_messages
            .iter()
            .rev()
            .find(|m| m.send_setting_id == send_setting_id && m.external_id == external_id)
            .cloned())
    }

    async fn update_status_by_conversation(
        &self,
        conversation_id: &str,
        tenant_id: TenantId,
        status_id: StatusId,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let latest = state.active_messages.iter_mut().rev().find(|m| {
            m.conversation_id.as_deref() == Some(conversation_id)
                && m.tenant_id == tenant_id
                && m.message_error.is_none()
        });
        match latest {
            Some(message) => {
                message.status_id = Some(status_id);
                message.status_changed_at = Some(at);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn find_by_conversation_and_status(
        &self,
        conversation_id: &str,
        status_id: StatusId,
    ) -> Result<Option<ActiveMessage>> {
        Ok(self
            .state
            .read()
            .await
            .active_messages
            .iter()
            .rev()
            .find(|m| {
                m.conversation_id.as_deref() == Some(conversation_id)
                    && m.status_id == Some(status_id)
                    && m.message_error.is_none()
            })
            .cloned())
    }

    async fn mark_invalid(
        &self,
        conversation_id: &str,
        status_id: StatusId,
        message_error: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ActiveMessage>> {
        let mut state = self.state.write().await;
        let mut updated = Vec::new();
        for message in state
            .active_messages
            .iter_mut()
            .filter(|m| m.conversation_id.as_deref() == Some(conversation_id))
        {
            message.status_id = Some(status_id);
            message.message_error = Some(message_error.to_string());
            message.status_changed_at = Some(at);
            updated.push(message.clone());
        }
        Ok(updated)
    }

    async fn mark_delivery(
        &self,
        id: ActiveMessageId,
        channel_id: &str,
        mark: DeliveryMark,
        at: DateTime<Utc>,
    ) -> Result<Option<ActiveMessage>> {
        let mut state = self.state.write().await;
        let Some(message) = state
            .active_messages
            .iter_mut()
            .find(|m| m.id == id && m.channel_id.as_deref() == Some(channel_id))
        else {
            return Ok(None);
        };

        let column = match mark {
            DeliveryMark::Received => &mut message.received_at,
            DeliveryMark::Answered => &mut message.answered_at,
            DeliveryMark::Read => &mut message.read_at,
        };
        if column.is_some() {
            return Ok(None);
        }
        *column = Some(at);
        Ok(Some(message.clone()))
    }

    async fn list_by_setting(
        &self,
        tenant_id: TenantId,
        send_setting_id: SendSettingId,
        filter: &ActiveMessageFilter,
    ) -> Result<Vec<ActiveMessageWithStatus>> {
        let state = self.state.read().await;
        let mut rows: Vec<&ActiveMessage> = state
            .active_messages
            .iter()
            .filter(|m| m.tenant_id == tenant_id && m.send_setting_id == send_setting_id)
            .filter(|m| {
                filter
                    .external_id
                    .as_deref()
                    .map_or(true, |e| m.external_id == e)
            })
            .filter(|m| filter.created_from.map_or(true, |from| m.created_at >= from))
            .filter(|m| filter.created_to.map_or(true, |to| m.created_at <= to))
            .filter(|m| {
                filter
                    .status_changed_after
                    .map_or(true, |after| m.status_changed_at.is_some_and(|at| at > after))
            })
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(rows
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .map(|m| {
                let status = m.status_id.and_then(|id| state.statuses.get(&id));
                ActiveMessageWithStatus {
                    message: m.clone(),
                    status_code: status.map(|s| s.code),
                    status_name: status.map(|s| s.name.clone()),
                }
            })
            .collect())
    }
}

#[async_trait]
impl CampaignRepository for MemoryStore {
    async fn create(&self, input: CreateCampaign) -> Result<Campaign> {
        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::now_v7(),
            tenant_id: input.tenant_id,
            name: input.name,
            send_setting_id: input.send_setting_id,
            template_id: input.template_id,
            status: CampaignStatus::Draft.to_string(),
            send_interval_secs: input.send_interval_secs.unwrap_or(0),
            scheduled_at: input.scheduled_at,
            started_at: None,
            ended_at: None,
            processing_total: 0,
            processed_total: 0,
            finished: false,
            created_at: now,
            updated_at: now,
        };

        let mut state = self.state.write().await;
        for (name, label) in input.attributes {
            state
                .campaign_attributes
                .retain(|a| !(a.campaign_id == campaign.id && a.name == name));
            state.campaign_attributes.push(CampaignAttribute {
                id: Uuid::now_v7(),
                campaign_id: campaign.id,
                name,
                label,
            });
        }
        state.campaigns.insert(campaign.id, campaign.clone());
        Ok(campaign)
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.state.read().await.campaigns.get(&id).cloned())
    }

    async fn get_by_tenant(
        &self,
        tenant_id: TenantId,
        id: CampaignId,
    ) -> Result<Option<Campaign>> {
        Ok(self
            .state
            .read()
            .await
            .campaigns
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn list_by_tenant(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>> {
        let state = self.state.read().await;
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| c.tenant_id == tenant_id)
            .filter(|c| status.map_or(true, |s| c.status == s.to_string()))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn attributes(&self, campaign_id: CampaignId) -> Result<Vec<CampaignAttribute>> {
        let mut attributes: Vec<CampaignAttribute> = self
            .state
            .read()
            .await
            .campaign_attributes
            .iter()
            .filter(|a| a.campaign_id == campaign_id)
            .cloned()
            .collect();
        attributes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(attributes)
    }

    async fn update_status(
        &self,
        id: CampaignId,
        status: CampaignStatus,
    ) -> Result<Option<Campaign>> {
        let mut state = self.state.write().await;
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(None);
        };
        let now = Utc::now();
        campaign.status = status.to_string();
        if status == CampaignStatus::Running && campaign.started_at.is_none() {
            campaign.started_at = Some(now);
        }
        if status == CampaignStatus::FinishedComplete {
            campaign.ended_at = Some(now);
        }
        campaign.updated_at = now;
        Ok(Some(campaign.clone()))
    }

    async fn set_scheduled(
        &self,
        id: CampaignId,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if let Some(campaign) = self.state.write().await.campaigns.get_mut(&id) {
            campaign.scheduled_at = scheduled_at;
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_progress(&self, id: CampaignId, progress: CampaignProgress) -> Result<()> {
        if let Some(campaign) = self.state.write().await.campaigns.get_mut(&id) {
            campaign.processing_total = progress.processing_total;
            campaign.processed_total = progress.processed_total;
            campaign.finished = progress.finished;
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn scheduled_ready(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>> {
        let awaiting = CampaignStatus::AwaitingSend.to_string();
        let mut ready: Vec<Campaign> = self
            .state
            .read()
            .await
            .campaigns
            .values()
            .filter(|c| c.status == awaiting)
            .filter(|c| c.scheduled_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        ready.sort_by_key(|c| c.scheduled_at);
        Ok(ready)
    }
}

#[async_trait]
impl ContactRepository for MemoryStore {
    async fn upsert(
        &self,
        tenant_id: TenantId,
        phone: &str,
        name: Option<&str>,
    ) -> Result<Contact> {
        let mut state = self.state.write().await;
        let now = Utc::now();

        if let Some(contact) = state
            .contacts
            .values_mut()
            .find(|c| c.tenant_id == tenant_id && c.phone == phone)
        {
            if let Some(name) = name {
                if contact.name.as_deref() != Some(name) {
                    contact.name = Some(name.to_string());
                    contact.updated_at = now;
                }
            }
            return Ok(contact.clone());
        }

        let contact = Contact {
            id: Uuid::now_v7(),
            tenant_id,
            phone: phone.to_string(),
            name: name.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        state.contacts.insert(contact.id, contact.clone());
        Ok(contact)
    }

    async fn set_attributes(
        &self,
        contact_id: ContactId,
        campaign_id: CampaignId,
        attributes: &[Attribute],
    ) -> Result<()> {
        let mut state = self.state.write().await;
        for attribute in attributes {
            state.contact_attributes.retain(|a| {
                !(a.contact_id == contact_id
                    && a.campaign_id == campaign_id
                    && a.name == attribute.name)
            });
            state.contact_attributes.push(ContactAttribute {
                contact_id,
                campaign_id,
                name: attribute.name.clone(),
                value: attribute.value.clone(),
            });
        }
        Ok(())
    }

    async fn add_to_campaign(
        &self,
        campaign_id: CampaignId,
        contact_id: ContactId,
        hash: &str,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        if state
            .campaign_contacts
            .iter()
            .any(|cc| cc.campaign_id == campaign_id && cc.contact_id == contact_id)
        {
            return Ok(false);
        }
        state.campaign_contacts.push(CampaignContact {
            id: Uuid::now_v7(),
            campaign_id,
            contact_id,
            hash: hash.to_string(),
            delivered_at: None,
            received_at: None,
            invalid: false,
            created_at: Utc::now(),
        });
        Ok(true)
    }

    async fn count_campaign_contacts(&self, campaign_id: CampaignId) -> Result<i64> {
        Ok(self
            .state
            .read()
            .await
            .campaign_contacts
            .iter()
            .filter(|cc| cc.campaign_id == campaign_id)
            .count() as i64)
    }

    async fn pending_for_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> Result<Vec<PendingCampaignContact>> {
        let state = self.state.read().await;
        Ok(state
            .campaign_contacts
            .iter()
            .filter(|cc| cc.campaign_id == campaign_id && cc.delivered_at.is_none() && !cc.invalid)
            .filter_map(|cc| {
                let contact = state.contacts.get(&cc.contact_id)?.clone();
                let attributes = state
                    .contact_attributes
                    .iter()
                    .filter(|a| a.contact_id == cc.contact_id && a.campaign_id == campaign_id)
                    .cloned()
                    .collect();
                Some(PendingCampaignContact {
                    campaign_contact: cc.clone(),
                    contact,
                    attributes,
                })
            })
            .collect())
    }

    async fn mark_delivered(&self, campaign_contact_id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(cc) = state
            .campaign_contacts
            .iter_mut()
            .find(|cc| cc.id == campaign_contact_id)
        {
            cc.delivered_at = Some(at);
        }
        Ok(())
    }

    async fn mark_received_by_hash(&self, hash: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut state = self.state.write().await;
        match state
            .campaign_contacts
            .iter_mut()
            .find(|cc| cc.hash == hash && cc.received_at.is_none())
        {
            Some(cc) => {
                cc.received_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_invalid_by_hash(&self, hash: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.campaign_contacts.iter_mut().find(|cc| cc.hash == hash) {
            Some(cc) => {
                cc.invalid = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_by_hash(&self, hash: &str) -> Result<Option<CampaignContact>> {
        Ok(self
            .state
            .read()
            .await
            .campaign_contacts
            .iter()
            .find(|cc| cc.hash == hash)
            .cloned())
    }
}
