//! Conversation materialization
//!
//! Pure construction of the [`NewConversation`] opened by a send that found
//! no existing conversation.

use super::SendRequest;
use crate::gateway::{ChannelConfig, Member, MemberKind, NewConversation};
use chrono::{DateTime, Duration, Utc};
use outreach_common::config::DispatchConfig;
use outreach_common::types::{Attribute, SendOrigin};
use outreach_storage::models::SendSetting;

/// Tag of the automated flow opening a conversation.
///
/// Campaign sends always use the campaign tag; otherwise the action is
/// looked up in the configured action table.
pub fn created_by_channel(
    config: &DispatchConfig,
    origin: SendOrigin,
    action: Option<&str>,
) -> Option<String> {
    match origin {
        SendOrigin::Campaign { .. } => Some(config.campaign_channel.clone()),
        SendOrigin::Api => action.and_then(|a| config.action_channels.get(a).cloned()),
    }
}

/// Members of a new conversation: system and user always, the bot only when
/// an action will run and no team takes over routing
pub fn members(
    config: &DispatchConfig,
    request: &SendRequest,
    channel: &ChannelConfig,
    action: Option<&str>,
    team_id: Option<&str>,
) -> Vec<Member> {
    let mut members = vec![
        Member::new(config.system_member_id.clone(), MemberKind::System),
        Member::new(request.phone.as_str(), MemberKind::User),
    ];
    if let (Some(bot_id), Some(_), None) = (channel.bot_id.as_deref(), action, team_id) {
        members.push(Member::new(bot_id, MemberKind::Bot));
    }
    members
}

/// Setting tags followed by request tags, without duplicates
pub fn tags(setting: &SendSetting, request: &SendRequest) -> Vec<String> {
    let mut tags = setting.tags_vec();
    for tag in &request.tags {
        if !tags.contains(tag) {
            tags.push(tag.clone());
        }
    }
    tags
}

/// Inputs resolved by the dispatcher before a conversation is opened
pub struct Plan<'a> {
    pub request: &'a SendRequest,
    pub setting: &'a SendSetting,
    pub channel: &'a ChannelConfig,
    pub attributes: Vec<Attribute>,
    pub action: Option<&'a str>,
    pub rating_enabled: bool,
    pub now: DateTime<Utc>,
}

pub fn new_conversation(config: &DispatchConfig, plan: Plan<'_>) -> NewConversation {
    let Plan {
        request,
        setting,
        channel,
        attributes,
        action,
        rating_enabled,
        now,
    } = plan;

    let team_id = request.team_id.clone().or_else(|| setting.team_id.clone());
    let created_by_channel = created_by_channel(config, request.origin, action);
    let omit_event = created_by_channel
        .as_ref()
        .is_some_and(|c| config.omit_event_channels.contains(c));

    NewConversation {
        tenant_id: request.tenant_id,
        workspace_id: channel.workspace_id.clone(),
        channel_id: channel.channel_id.clone(),
        phone: request.phone.as_str().to_string(),
        members: members(config, request, channel, action, team_id.as_deref()),
        tags: tags(setting, request),
        attributes,
        team_id,
        assigned_user_id: request.user_id.clone(),
        created_by_channel,
        omit_event,
        objective: setting.objective.clone(),
        rating_enabled,
        channel_expires_at: channel
            .session_window_hours
            .filter(|h| *h > 0)
            .and_then(Duration::try_hours)
            .and_then(|window| now.checked_add_signed(window)),
        expires_at: setting.expiration_policy().and_then(|p| p.deadline_from(now)),
        suspended_until: setting.suspend_policy().and_then(|p| p.deadline_from(now)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{request, send_setting};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn channel(bot: Option<&str>, window: Option<i64>) -> ChannelConfig {
        ChannelConfig {
            enabled: true,
            workspace_id: "ws-1".to_string(),
            channel_id: "chan-1".to_string(),
            bot_id: bot.map(str::to_string),
            session_window_hours: window,
        }
    }

    #[test]
    fn test_created_by_channel() {
        let config = DispatchConfig::default();
        assert_eq!(
            created_by_channel(&config, SendOrigin::Api, Some("reminder")),
            Some("reminder".to_string())
        );
        assert_eq!(created_by_channel(&config, SendOrigin::Api, Some("unknown")), None);
        assert_eq!(created_by_channel(&config, SendOrigin::Api, None), None);
        assert_eq!(
            created_by_channel(
                &config,
                SendOrigin::Campaign {
                    campaign_id: Uuid::new_v4()
                },
                Some("reminder")
            ),
            Some("campaign".to_string())
        );
    }

    #[test]
    fn test_bot_member_requires_action_without_team() {
        let config = DispatchConfig::default();
        let setting = send_setting(Uuid::new_v4());
        let req = request(&setting, "11987654321");
        let chan = channel(Some("bot-1"), None);

        let kinds = |m: Vec<Member>| m.into_iter().map(|m| m.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds(members(&config, &req, &chan, Some("reminder"), None)),
            vec![MemberKind::System, MemberKind::User, MemberKind::Bot]
        );
        assert_eq!(
            kinds(members(&config, &req, &chan, None, None)),
            vec![MemberKind::System, MemberKind::User]
        );
        assert_eq!(
            kinds(members(&config, &req, &chan, Some("reminder"), Some("team-1"))),
            vec![MemberKind::System, MemberKind::User]
        );
    }

    #[test]
    fn test_deadlines_from_policies() {
        let config = DispatchConfig::default();
        let mut setting = send_setting(Uuid::new_v4());
        setting.expiration_value = Some(2);
        setting.expiration_unit = Some("hours".to_string());
        let req = request(&setting, "11987654321");
        let now = Utc::now();

        let planned = new_conversation(
            &config,
            Plan {
                request: &req,
                setting: &setting,
                channel: &channel(None, Some(24)),
                attributes: req.merged_attributes(),
                action: Some("confirmation"),
                rating_enabled: false,
                now,
            },
        );

        assert_eq!(planned.expires_at, Some(now + Duration::hours(2)));
        assert_eq!(planned.suspended_until, None);
        assert_eq!(planned.channel_expires_at, Some(now + Duration::hours(24)));
        assert_eq!(planned.created_by_channel.as_deref(), Some("confirmation"));
        assert!(planned.omit_event);
        assert_eq!(planned.phone, "5511987654321");
    }

    #[test]
    fn test_oversized_policies_leave_no_deadline() {
        let config = DispatchConfig::default();
        let mut setting = send_setting(Uuid::new_v4());
        setting.expiration_value = Some(i64::MAX);
        setting.expiration_unit = Some("days".to_string());
        setting.suspend_value = Some(200_000_000);
        setting.suspend_unit = Some("days".to_string());
        let req = request(&setting, "11987654321");

        let planned = new_conversation(
            &config,
            Plan {
                request: &req,
                setting: &setting,
                channel: &channel(None, Some(i64::MAX)),
                attributes: req.merged_attributes(),
                action: None,
                rating_enabled: false,
                now: Utc::now(),
            },
        );

        assert_eq!(planned.expires_at, None);
        assert_eq!(planned.suspended_until, None);
        assert_eq!(planned.channel_expires_at, None);
    }
}
