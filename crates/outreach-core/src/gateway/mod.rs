//! Collaborator interfaces
//!
//! The channel transport, conversation storage, template engine and tenant
//! configuration live outside this crate. The core reaches them only through
//! the traits below.

mod memory;
mod reporter;
mod template;

pub use memory::{MemoryConversationStore, StaticChannelGateway, StaticTenantPolicy};
pub use reporter::{ErrorReporter, MemoryErrorReporter, TracingErrorReporter};
pub use template::PlaceholderRenderer;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use outreach_common::types::{Attribute, ConversationId, TenantId};
use outreach_common::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Channel settings resolved from a channel token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub enabled: bool,
    pub workspace_id: String,
    pub channel_id: String,
    pub bot_id: Option<String>,
    /// Length of the transport's customer-service session, for channels
    /// that have one
    pub session_window_hours: Option<i64>,
}

#[async_trait]
pub trait ChannelGateway: Send + Sync {
    async fn resolve_channel_config(&self, token: &str) -> Result<ChannelConfig>;

    /// Channel token used when no send setting pins one
    async fn primary_validator_channel(&self) -> Result<String>;
}

/// Role of a conversation member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    System,
    User,
    Bot,
    Agent,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub kind: MemberKind,
}

impl Member {
    pub fn new(id: impl Into<String>, kind: MemberKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }
}

/// Conversation as seen by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub tenant_id: TenantId,
    pub channel_id: String,
    pub phone: String,
    pub members: Vec<Member>,
    pub team_id: Option<String>,
    pub assigned_user_id: Option<String>,
    pub tags: Vec<String>,
    pub created_by_channel: Option<String>,
    pub open: bool,
}

impl Conversation {
    pub fn has_member(&self, kind: MemberKind) -> bool {
        self.members.iter().any(|m| m.kind == kind)
    }

    pub fn member(&self, kind: MemberKind) -> Option<&Member> {
        self.members.iter().find(|m| m.kind == kind)
    }
}

/// Everything needed to open a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewConversation {
    pub tenant_id: TenantId,
    pub workspace_id: String,
    pub channel_id: String,
    pub phone: String,
    pub members: Vec<Member>,
    pub tags: Vec<String>,
    pub attributes: Vec<Attribute>,
    pub team_id: Option<String>,
    pub assigned_user_id: Option<String>,
    /// Tag of the automated flow that opened the conversation
    pub created_by_channel: Option<String>,
    /// Whether the conversation must not raise a realtime "new conversation"
    /// notification
    pub omit_event: bool,
    pub objective: Option<String>,
    pub rating_enabled: bool,
    pub channel_expires_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub suspended_until: Option<DateTime<Utc>>,
}

/// Something posted into a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Activity {
    Text { from: String, text: String },
    /// Named event consumed by the bot engine
    Event { from: String, name: String },
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Open conversation matching any of the identities on the channel token
    async fn find_open_by_identities(
        &self,
        identities: &[String],
        channel_token: &str,
    ) -> Result<Option<Conversation>>;

    async fn find_open_by_identity_and_channel(
        &self,
        identity: &str,
        channel_id: &str,
        tenant_id: TenantId,
    ) -> Result<Option<Conversation>>;

    async fn create(&self, new_conversation: NewConversation) -> Result<Conversation>;

    async fn add_attributes(&self, conversation_id: &str, attributes: &[Attribute]) -> Result<()>;

    async fn add_member(&self, conversation_id: &str, member: Member) -> Result<()>;

    async fn post_activity(&self, conversation_id: &str, activity: Activity) -> Result<()>;

    async fn close(&self, conversation_id: &str) -> Result<()>;

    async fn has_open_conversation(&self, phone: &str, tenant_id: TenantId) -> Result<bool>;
}

#[async_trait]
pub trait TemplateRenderer: Send + Sync {
    async fn render(&self, template_id: &str, values: &HashMap<String, String>) -> Result<String>;

    async fn variable_names(&self, template_id: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait TenantPolicy: Send + Sync {
    async fn is_tenant_disabled(&self, tenant_id: TenantId) -> Result<bool>;

    async fn is_rating_enabled(&self, tenant_id: TenantId) -> Result<bool>;

    /// Maximum contacts a campaign of this tenant may hold, if limited
    async fn campaign_contact_limit(&self, tenant_id: TenantId) -> Result<Option<i64>>;
}
