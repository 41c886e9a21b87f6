//! Send Dispatcher - Orchestrates a single send

use super::materialize::{self, Plan};
use super::SendRequest;
use crate::conversation::ConversationResolver;
use crate::gateway::{
    Activity, ChannelConfig, ChannelGateway, Conversation, ConversationStore, ErrorReporter,
    Member, MemberKind, TemplateRenderer, TenantPolicy,
};
use crate::lock::DestinationLock;
use crate::metrics::Metrics;
use crate::missing::MissingEventTracker;
use crate::status::StatusStore;
use chrono::Utc;
use outreach_common::config::DispatchConfig;
use outreach_common::types::{Attribute, GlobalStatus, StatusRef};
use outreach_common::{Error, Result};
use outreach_storage::models::{ActiveMessage, CreateActiveMessage, SendSetting};
use outreach_storage::repository::SendSettingRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Error recorded on attempts made for a disabled tenant
pub const TENANT_DISABLED_ERROR: &str = "tenant disabled";

/// How a dispatch ended
#[derive(Debug, Clone)]
pub enum DispatchOutcome {
    /// The message went out through `conversation_id`
    Sent {
        attempt: ActiveMessage,
        conversation_id: String,
        created: bool,
    },
    /// Stopped before delivery; the attempt carries the terminal status
    Rejected {
        attempt: ActiveMessage,
        status: GlobalStatus,
    },
    /// The external id already had an attempt; nothing was sent
    Duplicate { attempt: ActiveMessage },
}

impl DispatchOutcome {
    pub fn attempt(&self) -> &ActiveMessage {
        match self {
            DispatchOutcome::Sent { attempt, .. } => attempt,
            DispatchOutcome::Rejected { attempt, .. } => attempt,
            DispatchOutcome::Duplicate { attempt } => attempt,
        }
    }

    pub fn label(&self) -> String {
        match self {
            DispatchOutcome::Sent { .. } => GlobalStatus::MessageSent.to_string(),
            DispatchOutcome::Rejected { status, .. } => status.to_string(),
            DispatchOutcome::Duplicate { .. } => "duplicate".to_string(),
        }
    }
}

/// Collaborators of the dispatcher
pub struct DispatcherDeps {
    pub settings: Arc<dyn SendSettingRepository>,
    pub channels: Arc<dyn ChannelGateway>,
    pub conversations: Arc<dyn ConversationStore>,
    pub templates: Arc<dyn TemplateRenderer>,
    pub tenants: Arc<dyn TenantPolicy>,
    pub status: Arc<StatusStore>,
    pub missing: Arc<MissingEventTracker>,
    pub lock: Arc<DestinationLock>,
    pub reporter: Arc<dyn ErrorReporter>,
    pub metrics: Arc<Metrics>,
}

/// Turns a [`SendRequest`] into a conversation, a recorded attempt and the
/// delivered message
pub struct SendDispatcher {
    deps: DispatcherDeps,
    resolver: ConversationResolver,
    config: DispatchConfig,
}

/// Conversation after resolution or creation, with what changed
struct Target {
    conversation: Conversation,
    created: bool,
    attempt: ActiveMessage,
}

impl SendDispatcher {
    pub fn new(deps: DispatcherDeps, config: DispatchConfig) -> Self {
        let resolver = ConversationResolver::new(deps.conversations.clone());
        Self {
            deps,
            resolver,
            config,
        }
    }

    /// Dispatch one request.
    ///
    /// Destination problems end in `Ok(Rejected)` with a terminal attempt.
    /// Configuration problems and lease contention are errors.
    pub async fn dispatch(&self, request: &SendRequest) -> Result<DispatchOutcome> {
        let setting = self
            .deps
            .settings
            .get_by_tenant(request.tenant_id, request.send_setting_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("Send setting {} not found", request.send_setting_id))
            })?;

        if !setting.enabled {
            return Err(Error::SettingDisabled(setting.id.to_string()));
        }

        if self.deps.tenants.is_tenant_disabled(request.tenant_id).await? {
            let mut input = attempt_input(request, None, None);
            input.message_error = Some(TENANT_DISABLED_ERROR.to_string());
            self.deps.status.record_attempt(input).await?;
            return Err(Error::TenantDisabled(request.tenant_id.to_string()));
        }

        if !request.is_valid {
            return self
                .reject(&setting, request, None, GlobalStatus::InvalidNumber)
                .await;
        }

        let channel_token = self.channel_token(&setting).await?;
        let channel = self
            .deps
            .channels
            .resolve_channel_config(&channel_token)
            .await?;
        if !channel.enabled {
            return self
                .reject(&setting, request, None, GlobalStatus::ChannelDisabled)
                .await;
        }

        let lease = self
            .deps
            .lock
            .acquire(request.tenant_id, &request.phone)
            .await?;
        let target = self
            .open_target(&setting, request, &channel_token, &channel)
            .await;
        self.deps.lock.release(lease).await?;

        let target = match target? {
            Ok(target) => target,
            Err(rejected) => return Ok(rejected),
        };

        let action = effective_action(request, &setting);
        self.deliver(&setting, request, &target, action).await;
        self.auto_close(request, &target, action).await;

        let attempt = self
            .deps
            .status
            .set_status(
                &target.conversation.id,
                request.tenant_id,
                StatusRef::global(GlobalStatus::MessageSent),
            )
            .await?
            .unwrap_or(target.attempt);

        self.deps
            .metrics
            .sends_total
            .with_label_values(&[&GlobalStatus::MessageSent.to_string()])
            .inc();
        info!(
            attempt_id = %attempt.id,
            conversation_id = %target.conversation.id,
            created = target.created,
            "Message sent"
        );

        Ok(DispatchOutcome::Sent {
            attempt,
            conversation_id: target.conversation.id,
            created: target.created,
        })
    }

    async fn channel_token(&self, setting: &SendSetting) -> Result<String> {
        if setting.channel_token.is_empty() {
            self.deps.channels.primary_validator_channel().await
        } else {
            Ok(setting.channel_token.clone())
        }
    }

    /// Steps run under the destination lease: resolve or open the
    /// conversation, record the attempt and arm the missing markers
    async fn open_target(
        &self,
        setting: &SendSetting,
        request: &SendRequest,
        channel_token: &str,
        channel: &ChannelConfig,
    ) -> Result<std::result::Result<Target, DispatchOutcome>> {
        if let Some(attempt) = self
            .deps
            .status
            .find_by_external_id(setting.id, &request.external_id)
            .await?
        {
            debug!(external_id = %request.external_id, "Send already dispatched");
            return Ok(Err(DispatchOutcome::Duplicate { attempt }));
        }

        let existing = self
            .resolver
            .resolve(request.tenant_id, &request.phone, channel_token, channel)
            .await;

        if let Some(conversation) = &existing {
            if !setting.send_message_to_open_conversation {
                let outcome = self
                    .reject(
                        setting,
                        request,
                        Some(conversation),
                        GlobalStatus::OpenConversation,
                    )
                    .await?;
                return Ok(Err(outcome));
            }
        }

        let attributes = request.merged_attributes();
        let action = effective_action(request, setting);

        let (conversation, created) = match existing {
            Some(conversation) => {
                let conversation = self
                    .reuse(conversation, channel, &attributes, action, request)
                    .await?;
                (conversation, false)
            }
            None => {
                let rating_enabled = self
                    .deps
                    .tenants
                    .is_rating_enabled(request.tenant_id)
                    .await?;
                let planned = materialize::new_conversation(
                    &self.config,
                    Plan {
                        request,
                        setting,
                        channel,
                        attributes,
                        action,
                        rating_enabled,
                        now: Utc::now(),
                    },
                );
                let conversation = self.deps.conversations.create(planned).await?;
                debug!(conversation_id = %conversation.id, "Conversation opened");
                (conversation, true)
            }
        };

        let attempt = self
            .deps
            .status
            .record_attempt(attempt_input(
                request,
                Some(conversation.id.clone()),
                Some(channel.channel_id.clone()),
            ))
            .await?;

        if created {
            self.deps
                .missing
                .register(&request.phone, &channel.channel_id, attempt.id)
                .await?;
        }

        Ok(Ok(Target {
            conversation,
            created,
            attempt,
        }))
    }

    /// Refresh an existing conversation's attributes and bring the bot in
    /// when an action is about to run
    async fn reuse(
        &self,
        mut conversation: Conversation,
        channel: &ChannelConfig,
        attributes: &[Attribute],
        action: Option<&str>,
        request: &SendRequest,
    ) -> Result<Conversation> {
        self.deps
            .conversations
            .add_attributes(&conversation.id, attributes)
            .await?;

        let routed = request.team_id.is_some() || conversation.team_id.is_some();
        if let (Some(bot_id), Some(_), false) = (channel.bot_id.as_deref(), action, routed) {
            if !conversation.has_member(MemberKind::Bot) {
                let bot = Member::new(bot_id, MemberKind::Bot);
                self.deps
                    .conversations
                    .add_member(&conversation.id, bot.clone())
                    .await?;
                conversation.members.push(bot);
            }
        }
        Ok(conversation)
    }

    /// Post the text and the action event. Each failure is reported and the
    /// other post still happens.
    async fn deliver(
        &self,
        setting: &SendSetting,
        request: &SendRequest,
        target: &Target,
        action: Option<&str>,
    ) {
        let conversation_id = &target.conversation.id;
        let sender = target
            .conversation
            .member(MemberKind::Bot)
            .or_else(|| target.conversation.member(MemberKind::System))
            .map(|m| m.id.clone())
            .unwrap_or_else(|| self.config.system_member_id.clone());

        match self.text(setting, request).await {
            Ok(Some(text)) => {
                let activity = Activity::Text {
                    from: sender.clone(),
                    text,
                };
                if let Err(e) = self
                    .deps
                    .conversations
                    .post_activity(conversation_id, activity)
                    .await
                {
                    self.deps.reporter.report("post_text", &e.to_string());
                }
            }
            Ok(None) => debug!(conversation_id = %conversation_id, "Nothing to post"),
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Template rendering failed");
                self.deps.reporter.report("render_template", &e.to_string());
            }
        }

        let Some(action) = action else {
            return;
        };
        let conversation = &target.conversation;
        let (Some(_), Some(bot)) = (
            conversation.member(MemberKind::User),
            conversation.member(MemberKind::Bot),
        ) else {
            debug!(conversation_id = %conversation_id, action, "No bot to run the action");
            return;
        };

        let activity = Activity::Event {
            from: bot.id.clone(),
            name: action.to_string(),
        };
        if let Err(e) = self
            .deps
            .conversations
            .post_activity(conversation_id, activity)
            .await
        {
            self.deps.reporter.report("post_action", &e.to_string());
        }
    }

    /// Literal text, else the rendered template, else nothing
    async fn text(&self, setting: &SendSetting, request: &SendRequest) -> Result<Option<String>> {
        if let Some(text) = request.text.as_deref().filter(|t| !t.is_empty()) {
            return Ok(Some(text.to_string()));
        }
        let Some(template_id) = request
            .template_id
            .as_deref()
            .or(setting.template_id.as_deref())
        else {
            return Ok(None);
        };

        let values: HashMap<String, String> = request
            .merged_attributes()
            .into_iter()
            .map(|a| (a.name, a.value))
            .collect();
        self.deps
            .templates
            .render(template_id, &values)
            .await
            .map(Some)
    }

    /// Close conversations nobody will pick up: no action, no team, no
    /// assignee and no agent in the conversation
    async fn auto_close(&self, request: &SendRequest, target: &Target, action: Option<&str>) {
        let conversation = &target.conversation;
        let unattended = action.is_none()
            && request.team_id.is_none()
            && conversation.team_id.is_none()
            && request.user_id.is_none()
            && conversation.assigned_user_id.is_none()
            && !conversation.has_member(MemberKind::Agent);
        if !unattended {
            return;
        }

        if let Err(e) = self.deps.conversations.close(&conversation.id).await {
            self.deps.reporter.report("auto_close", &e.to_string());
        } else {
            debug!(conversation_id = %conversation.id, "Conversation auto-closed");
        }
    }

    async fn reject(
        &self,
        setting: &SendSetting,
        request: &SendRequest,
        conversation: Option<&Conversation>,
        status: GlobalStatus,
    ) -> Result<DispatchOutcome> {
        let input = attempt_input(
            request,
            conversation.map(|c| c.id.clone()),
            conversation.map(|c| c.channel_id.clone()),
        );
        let attempt = self
            .deps
            .status
            .record_terminal(setting, input, status)
            .await?;

        self.deps
            .metrics
            .sends_total
            .with_label_values(&[&status.to_string()])
            .inc();
        info!(
            external_id = %request.external_id,
            status = %status,
            "Send rejected"
        );

        Ok(DispatchOutcome::Rejected { attempt, status })
    }
}

/// Request action, else the setting's fixed action, unless omitted
fn effective_action<'a>(request: &'a SendRequest, setting: &'a SendSetting) -> Option<&'a str> {
    if request.omit_action {
        return None;
    }
    request
        .effective_action()
        .or_else(|| setting.action.as_deref().filter(|a| !a.is_empty()))
}

fn attempt_input(
    request: &SendRequest,
    conversation_id: Option<String>,
    channel_id: Option<String>,
) -> CreateActiveMessage {
    CreateActiveMessage {
        tenant_id: request.tenant_id,
        send_setting_id: request.send_setting_id,
        conversation_id,
        channel_id,
        phone: request.phone.as_str().to_string(),
        external_id: request.external_id.clone(),
        status_id: None,
        message_error: None,
        campaign_id: request.origin.campaign_id(),
    }
}
