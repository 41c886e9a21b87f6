//! In-process collaborators
//!
//! Used for local runs and tests: channels and tenant policies come from
//! configuration, conversations live in memory.

use super::{
    Activity, ChannelConfig, ChannelGateway, Conversation, ConversationStore, Member,
    NewConversation, TenantPolicy,
};
use async_trait::async_trait;
use outreach_common::config::GatewayConfig;
use outreach_common::types::{Attribute, ConversationId, TenantId};
use outreach_common::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Channel gateway over a fixed table of channels
pub struct StaticChannelGateway {
    channels: HashMap<String, ChannelConfig>,
    validator_channel: Option<String>,
}

impl StaticChannelGateway {
    pub fn new(validator_channel: Option<String>) -> Self {
        Self {
            channels: HashMap::new(),
            validator_channel,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        let channels = config
            .channels
            .iter()
            .map(|(token, c)| {
                (
                    token.clone(),
                    ChannelConfig {
                        enabled: c.enabled,
                        workspace_id: c.workspace_id.clone(),
                        channel_id: c.channel_id.clone(),
                        bot_id: c.bot_id.clone(),
                        session_window_hours: c.session_window_hours,
                    },
                )
            })
            .collect();
        Self {
            channels,
            validator_channel: config.validator_channel.clone(),
        }
    }

    pub fn with_channel(mut self, token: impl Into<String>, config: ChannelConfig) -> Self {
        self.channels.insert(token.into(), config);
        self
    }
}

#[async_trait]
impl ChannelGateway for StaticChannelGateway {
    async fn resolve_channel_config(&self, token: &str) -> Result<ChannelConfig> {
        self.channels
            .get(token)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Channel {} not configured", token)))
    }

    async fn primary_validator_channel(&self) -> Result<String> {
        self.validator_channel
            .clone()
            .ok_or_else(|| Error::Config("No validator channel configured".to_string()))
    }
}

/// Tenant policy over fixed lists
#[derive(Default)]
pub struct StaticTenantPolicy {
    disabled: HashSet<TenantId>,
    rating: HashSet<TenantId>,
    contact_limit: Option<i64>,
}

impl StaticTenantPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            disabled: config.disabled_tenants.iter().copied().collect(),
            rating: config.rating_tenants.iter().copied().collect(),
            contact_limit: config.campaign_contact_limit,
        }
    }

    pub fn with_disabled(mut self, tenant_id: TenantId) -> Self {
        self.disabled.insert(tenant_id);
        self
    }

    pub fn with_rating(mut self, tenant_id: TenantId) -> Self {
        self.rating.insert(tenant_id);
        self
    }

    pub fn with_contact_limit(mut self, limit: i64) -> Self {
        self.contact_limit = Some(limit);
        self
    }
}

#[async_trait]
impl TenantPolicy for StaticTenantPolicy {
    async fn is_tenant_disabled(&self, tenant_id: TenantId) -> Result<bool> {
        Ok(self.disabled.contains(&tenant_id))
    }

    async fn is_rating_enabled(&self, tenant_id: TenantId) -> Result<bool> {
        Ok(self.rating.contains(&tenant_id))
    }

    async fn campaign_contact_limit(&self, _tenant_id: TenantId) -> Result<Option<i64>> {
        Ok(self.contact_limit)
    }
}

#[derive(Default)]
struct ConversationState {
    conversations: Vec<Conversation>,
    created: Vec<NewConversation>,
    activities: HashMap<ConversationId, Vec<Activity>>,
    attributes: HashMap<ConversationId, Vec<Attribute>>,
}

/// Conversation store held in memory.
///
/// Channel tokens map to channel ids through [`with_channel`]; lookups by
/// identity can be made to fail to exercise fallbacks.
///
/// [`with_channel`]: MemoryConversationStore::with_channel
#[derive(Default)]
pub struct MemoryConversationStore {
    state: RwLock<ConversationState>,
    channel_tokens: HashMap<String, String>,
    fail_identity_lookup: AtomicBool,
    fail_text_posts: AtomicBool,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(mut self, token: impl Into<String>, channel_id: impl Into<String>) -> Self {
        self.channel_tokens.insert(token.into(), channel_id.into());
        self
    }

    pub fn fail_identity_lookup(&self, fail: bool) {
        self.fail_identity_lookup.store(fail, Ordering::SeqCst);
    }

    pub fn fail_text_posts(&self, fail: bool) {
        self.fail_text_posts.store(fail, Ordering::SeqCst);
    }

    /// Seed an existing conversation
    pub async fn insert(&self, conversation: Conversation) {
        self.state.write().await.conversations.push(conversation);
    }

    pub async fn conversations(&self) -> Vec<Conversation> {
        self.state.read().await.conversations.clone()
    }

    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        self.state
            .read()
            .await
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
    }

    /// Specs passed to `create`, in order
    pub async fn created(&self) -> Vec<NewConversation> {
        self.state.read().await.created.clone()
    }

    pub async fn activities(&self, conversation_id: &str) -> Vec<Activity> {
        self.state
            .read()
            .await
            .activities
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn attributes(&self, conversation_id: &str) -> Vec<Attribute> {
        self.state
            .read()
            .await
            .attributes
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    fn not_found(conversation_id: &str) -> Error {
        Error::NotFound(format!("Conversation {} not found", conversation_id))
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_open_by_identities(
        &self,
        identities: &[String],
        channel_token: &str,
    ) -> Result<Option<Conversation>> {
        if self.fail_identity_lookup.load(Ordering::SeqCst) {
            return Err(Error::Delivery("identity index unavailable".to_string()));
        }
        let Some(channel_id) = self.channel_tokens.get(channel_token) else {
            return Ok(None);
        };
        Ok(self
            .state
            .read()
            .await
            .conversations
            .iter()
            .find(|c| c.open && &c.channel_id == channel_id && identities.contains(&c.phone))
            .cloned())
    }

    async fn find_open_by_identity_and_channel(
        &self,
        identity: &str,
        channel_id: &str,
        tenant_id: TenantId,
    ) -> Result<Option<Conversation>> {
        Ok(self
            .state
            .read()
            .await
            .conversations
            .iter()
            .find(|c| {
                c.open && c.phone == identity && c.channel_id == channel_id && c.tenant_id == tenant_id
            })
            .cloned())
    }

    async fn create(&self, new_conversation: NewConversation) -> Result<Conversation> {
        let conversation = Conversation {
            id: Uuid::new_v4().to_string(),
            tenant_id: new_conversation.tenant_id,
            channel_id: new_conversation.channel_id.clone(),
            phone: new_conversation.phone.clone(),
            members: new_conversation.members.clone(),
            team_id: new_conversation.team_id.clone(),
            assigned_user_id: new_conversation.assigned_user_id.clone(),
            tags: new_conversation.tags.clone(),
            created_by_channel: new_conversation.created_by_channel.clone(),
            open: true,
        };

        let mut state = self.state.write().await;
        state
            .attributes
            .insert(conversation.id.clone(), new_conversation.attributes.clone());
        state.created.push(new_conversation);
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn add_attributes(&self, conversation_id: &str, attributes: &[Attribute]) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(Self::not_found(conversation_id));
        }
        let stored = state
            .attributes
            .entry(conversation_id.to_string())
            .or_default();
        for attribute in attributes {
            stored.retain(|a| a.name != attribute.name);
            stored.push(attribute.clone());
        }
        Ok(())
    }

    async fn add_member(&self, conversation_id: &str, member: Member) -> Result<()> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| Self::not_found(conversation_id))?;
        if !conversation.members.contains(&member) {
            conversation.members.push(member);
        }
        Ok(())
    }

    async fn post_activity(&self, conversation_id: &str, activity: Activity) -> Result<()> {
        if matches!(activity, Activity::Text { .. }) && self.fail_text_posts.load(Ordering::SeqCst)
        {
            return Err(Error::Delivery("channel rejected the text".to_string()));
        }
        let mut state = self.state.write().await;
        if !state.conversations.iter().any(|c| c.id == conversation_id) {
            return Err(Self::not_found(conversation_id));
        }
        state
            .activities
            .entry(conversation_id.to_string())
            .or_default()
            .push(activity);
        Ok(())
    }

    async fn close(&self, conversation_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let conversation = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| Self::not_found(conversation_id))?;
        conversation.open = false;
        Ok(())
    }

    async fn has_open_conversation(&self, phone: &str, tenant_id: TenantId) -> Result<bool> {
        Ok(self
            .state
            .read()
            .await
            .conversations
            .iter()
            .any(|c| c.open && c.phone == phone && c.tenant_id == tenant_id))
    }
}
