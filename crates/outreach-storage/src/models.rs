//! Database models

use chrono::{DateTime, Utc};
use outreach_common::types::{
    ActiveMessageId, CampaignId, ContactId, ConversationId, PolicyDuration, SendSettingId,
    StatusId, TenantId, TimeUnit,
};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Send setting model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SendSetting {
    pub id: SendSettingId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Token of the channel messages are sent through
    pub channel_token: String,
    /// Opaque token callers use to address this setting
    pub api_token: String,
    pub enabled: bool,
    pub callback_url: Option<String>,
    pub expiration_value: Option<i64>,
    pub expiration_unit: Option<String>,
    pub suspend_value: Option<i64>,
    pub suspend_unit: Option<String>,
    pub send_message_to_open_conversation: bool,
    pub objective: Option<String>,
    pub action: Option<String>,
    pub template_id: Option<String>,
    pub team_id: Option<String>,
    #[serde(default)]
    pub tags: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SendSetting {
    /// How long a conversation opened by this setting stays alive
    pub fn expiration_policy(&self) -> Option<PolicyDuration> {
        policy(self.expiration_value, self.expiration_unit.as_deref())
    }

    /// How long a conversation opened by this setting may stay suspended
    pub fn suspend_policy(&self) -> Option<PolicyDuration> {
        policy(self.suspend_value, self.suspend_unit.as_deref())
    }

    /// Get tags as a vector
    pub fn tags_vec(&self) -> Vec<String> {
        serde_json::from_value(self.tags.clone()).unwrap_or_default()
    }
}

fn policy(value: Option<i64>, unit: Option<&str>) -> Option<PolicyDuration> {
    let value = value.filter(|v| *v > 0)?;
    let unit: TimeUnit = unit?.parse().ok()?;
    Some(PolicyDuration::new(value, unit))
}

/// Create send setting input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSendSetting {
    pub tenant_id: TenantId,
    pub name: String,
    pub channel_token: String,
    pub api_token: String,
    pub callback_url: Option<String>,
    pub expiration: Option<PolicyDuration>,
    pub suspend: Option<PolicyDuration>,
    pub send_message_to_open_conversation: bool,
    pub objective: Option<String>,
    pub action: Option<String>,
    pub template_id: Option<String>,
    pub team_id: Option<String>,
    pub tags: Vec<String>,
}

/// Status row: global when `tenant_id` is null
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Status {
    pub id: StatusId,
    pub tenant_id: Option<TenantId>,
    pub code: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Active message (one row per send attempt)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActiveMessage {
    pub id: ActiveMessageId,
    pub tenant_id: TenantId,
    pub send_setting_id: SendSettingId,
    pub conversation_id: Option<ConversationId>,
    pub channel_id: Option<String>,
    pub phone: String,
    pub external_id: String,
    pub status_id: Option<StatusId>,
    pub message_error: Option<String>,
    pub campaign_id: Option<CampaignId>,
    pub created_at: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub answered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub status_changed_at: Option<DateTime<Utc>>,
}

impl ActiveMessage {
    /// Whether the attempt carries a definitive failure
    pub fn has_error(&self) -> bool {
        self.message_error.is_some()
    }
}

/// Create active message input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateActiveMessage {
    pub tenant_id: TenantId,
    pub send_setting_id: SendSettingId,
    pub conversation_id: Option<ConversationId>,
    pub channel_id: Option<String>,
    pub phone: String,
    pub external_id: String,
    pub status_id: Option<StatusId>,
    pub message_error: Option<String>,
    pub campaign_id: Option<CampaignId>,
}

/// Which delivery timestamp an inbound signal stamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMark {
    Received,
    Answered,
    Read,
}

impl DeliveryMark {
    pub fn column(&self) -> &'static str {
        match self {
            DeliveryMark::Received => "received_at",
            DeliveryMark::Answered => "answered_at",
            DeliveryMark::Read => "read_at",
        }
    }
}

impl std::fmt::Display for DeliveryMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMark::Received => write!(f, "received"),
            DeliveryMark::Answered => write!(f, "answered"),
            DeliveryMark::Read => write!(f, "read"),
        }
    }
}

/// Filter for listing active messages
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActiveMessageFilter {
    pub external_id: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub status_changed_after: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

/// Active message joined with its status
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ActiveMessageWithStatus {
    #[sqlx(flatten)]
    pub message: ActiveMessage,
    pub status_code: Option<i32>,
    pub status_name: Option<String>,
}

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    AwaitingSend,
    Running,
    Paused,
    FinishedComplete,
}

impl std::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CampaignStatus::Draft => write!(f, "draft"),
            CampaignStatus::AwaitingSend => write!(f, "awaiting_send"),
            CampaignStatus::Running => write!(f, "running"),
            CampaignStatus::Paused => write!(f, "paused"),
            CampaignStatus::FinishedComplete => write!(f, "finished_complete"),
        }
    }
}

impl std::str::FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "awaiting_send" => Ok(CampaignStatus::AwaitingSend),
            "running" => Ok(CampaignStatus::Running),
            "paused" => Ok(CampaignStatus::Paused),
            "finished_complete" => Ok(CampaignStatus::FinishedComplete),
            _ => Err(format!("Invalid campaign status: {}", s)),
        }
    }
}

/// Campaign model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub tenant_id: TenantId,
    pub name: String,
    pub send_setting_id: Option<SendSettingId>,
    pub template_id: Option<String>,
    pub status: String,
    pub send_interval_secs: i32,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub processing_total: i64,
    pub processed_total: i64,
    pub finished: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Get status enum
    pub fn status_enum(&self) -> Option<CampaignStatus> {
        self.status.parse().ok()
    }

    /// Ingest progress percentage
    pub fn progress_percentage(&self) -> f64 {
        if self.processing_total == 0 {
            return 0.0;
        }
        (self.processed_total as f64 / self.processing_total as f64) * 100.0
    }
}

/// Create campaign input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCampaign {
    pub tenant_id: TenantId,
    pub name: String,
    pub send_setting_id: Option<SendSettingId>,
    pub template_id: Option<String>,
    pub send_interval_secs: Option<i32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    /// Template variables as (name, label)
    pub attributes: Vec<(String, String)>,
}

/// Template variable defined by a campaign
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignAttribute {
    pub id: uuid::Uuid,
    pub campaign_id: CampaignId,
    pub name: String,
    pub label: String,
}

/// Contact model
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub tenant_id: TenantId,
    pub phone: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-campaign attribute value of a contact
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ContactAttribute {
    pub contact_id: ContactId,
    pub campaign_id: CampaignId,
    pub name: String,
    pub value: String,
}

/// Contact membership in a campaign
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CampaignContact {
    pub id: uuid::Uuid,
    pub campaign_id: CampaignId,
    pub contact_id: ContactId,
    /// External correlation id used for sends to this contact
    pub hash: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub invalid: bool,
    pub created_at: DateTime<Utc>,
}

/// Contact ready to be sent within a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCampaignContact {
    pub campaign_contact: CampaignContact,
    pub contact: Contact,
    pub attributes: Vec<ContactAttribute>,
}

impl PendingCampaignContact {
    /// Value of a named attribute for this contact
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }
}

/// Aggregate ingest progress for a campaign
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CampaignProgress {
    pub processing_total: i64,
    pub processed_total: i64,
    pub finished: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn setting() -> SendSetting {
        SendSetting {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "reminders".to_string(),
            channel_token: "chan".to_string(),
            api_token: "token".to_string(),
            enabled: true,
            callback_url: None,
            expiration_value: Some(3),
            expiration_unit: Some("hours".to_string()),
            suspend_value: Some(0),
            suspend_unit: Some("days".to_string()),
            send_message_to_open_conversation: false,
            objective: None,
            action: None,
            template_id: None,
            team_id: None,
            tags: serde_json::json!(["a", "b"]),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_setting_policies() {
        let s = setting();
        assert_eq!(
            s.expiration_policy(),
            Some(PolicyDuration::new(3, TimeUnit::Hours))
        );
        // zero means "no policy"
        assert_eq!(s.suspend_policy(), None);
        assert_eq!(s.tags_vec(), vec!["a", "b"]);
    }

    #[test]
    fn test_campaign_status_roundtrip() {
        for status in [
            CampaignStatus::Draft,
            CampaignStatus::AwaitingSend,
            CampaignStatus::Running,
            CampaignStatus::Paused,
            CampaignStatus::FinishedComplete,
        ] {
            assert_eq!(status.to_string().parse::<CampaignStatus>(), Ok(status));
        }
        assert!("sending".parse::<CampaignStatus>().is_err());
    }
}
