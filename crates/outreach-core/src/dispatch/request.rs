//! Queued send request

use outreach_common::types::{
    Attribute, PhoneNumber, SendOrigin, SendSettingId, TenantId,
};
use serde::{Deserialize, Serialize};

/// Attribute carrying the send setting id on every conversation
pub const SETTING_ATTRIBUTE: &str = "send_setting_id";

/// A send accepted by [`SendService`](super::SendService) and waiting for
/// the dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendRequest {
    pub tenant_id: TenantId,
    pub send_setting_id: SendSettingId,
    pub phone: PhoneNumber,
    /// Result of upstream number validation
    pub is_valid: bool,
    pub external_id: String,
    /// Literal text; when absent the template is rendered
    pub text: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    /// Bot action to trigger once the message is delivered
    pub action: Option<String>,
    #[serde(default)]
    pub omit_action: bool,
    pub team_id: Option<String>,
    /// Agent the conversation is assigned to
    pub user_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub origin: SendOrigin,
}

impl SendRequest {
    /// Action to run after delivery, unless the caller asked to omit it
    pub fn effective_action(&self) -> Option<&str> {
        if self.omit_action {
            None
        } else {
            self.action.as_deref().filter(|a| !a.is_empty())
        }
    }

    /// Caller attributes deduplicated by name, plus the setting attribute
    pub fn merged_attributes(&self) -> Vec<Attribute> {
        merge_attributes(&self.attributes, self.send_setting_id)
    }
}

/// Deduplicate by name keeping the last value (at the position of the first
/// occurrence), then append the setting attribute.
pub fn merge_attributes(attributes: &[Attribute], send_setting_id: SendSettingId) -> Vec<Attribute> {
    let mut merged: Vec<Attribute> = Vec::with_capacity(attributes.len() + 1);

    for attribute in attributes.iter().filter(|a| a.name != SETTING_ATTRIBUTE) {
        match merged.iter_mut().find(|m| m.name == attribute.name) {
            Some(existing) => existing.value = attribute.value.clone(),
            None => merged.push(attribute.clone()),
        }
    }

    merged.push(Attribute::new(SETTING_ATTRIBUTE, send_setting_id.to_string()));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_merge_last_write_wins() {
        let setting = Uuid::new_v4();
        let merged = merge_attributes(
            &[
                Attribute::new("name", "Ana"),
                Attribute::new("date", "10/10"),
                Attribute::new("name", "Bia"),
            ],
            setting,
        );

        assert_eq!(
            merged,
            vec![
                Attribute::new("name", "Bia"),
                Attribute::new("date", "10/10"),
                Attribute::new(SETTING_ATTRIBUTE, setting.to_string()),
            ]
        );
    }

    #[test]
    fn test_caller_cannot_spoof_setting_attribute() {
        let setting = Uuid::new_v4();
        let merged = merge_attributes(&[Attribute::new(SETTING_ATTRIBUTE, "other")], setting);
        assert_eq!(merged, vec![Attribute::new(SETTING_ATTRIBUTE, setting.to_string())]);
    }
}
