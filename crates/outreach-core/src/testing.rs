//! Shared fixtures for unit tests

use crate::cache::MemoryCache;
use crate::callback::CallbackNotifier;
use crate::campaign::{CampaignRunner, ContactIngestQueue, ProgressTracker};
use crate::dispatch::{DispatcherDeps, SendDispatcher, SendRequest, SendService};
use crate::events::BroadcastEventBus;
use crate::gateway::{
    ChannelConfig, Conversation, Member, MemberKind, MemoryConversationStore,
    MemoryErrorReporter, PlaceholderRenderer, StaticChannelGateway, StaticTenantPolicy,
};
use crate::lock::DestinationLock;
use crate::metrics::Metrics;
use crate::missing::MissingEventTracker;
use crate::rate_limiter::RateLimiter;
use crate::status::StatusStore;
use chrono::Utc;
use outreach_common::config::{CallbackConfig, CampaignConfig, DispatchConfig, RateLimitConfig};
use outreach_common::types::{
    Attribute, CampaignId, PhoneNumber, SendOrigin, StatusId, TenantId,
};
use outreach_storage::memory::MemoryStore;
use outreach_storage::models::{
    Campaign, CampaignContact, CampaignStatus, CreateActiveMessage, CreateCampaign, SendSetting,
};
use outreach_storage::repository::{CampaignRepository, ContactRepository, StatusRepository};
use std::sync::Arc;
use uuid::Uuid;

pub const CHANNEL_TOKEN: &str = "chan-token";
pub const CHANNEL_ID: &str = "chan-1";

pub fn send_setting(tenant_id: TenantId) -> SendSetting {
    SendSetting {
        id: Uuid::new_v4(),
        tenant_id,
        name: "reminders".to_string(),
        channel_token: CHANNEL_TOKEN.to_string(),
        api_token: Uuid::new_v4().simple().to_string(),
        enabled: true,
        callback_url: None,
        expiration_value: None,
        expiration_unit: None,
        suspend_value: None,
        suspend_unit: None,
        send_message_to_open_conversation: false,
        objective: None,
        action: None,
        template_id: None,
        team_id: None,
        tags: serde_json::json!([]),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

pub fn request(setting: &SendSetting, phone: &str) -> SendRequest {
    SendRequest {
        tenant_id: setting.tenant_id,
        send_setting_id: setting.id,
        phone: PhoneNumber::parse(phone).unwrap(),
        is_valid: true,
        external_id: Uuid::new_v4().to_string(),
        text: None,
        template_id: None,
        attributes: Vec::new(),
        action: None,
        omit_action: false,
        team_id: None,
        user_id: None,
        tags: Vec::new(),
        origin: SendOrigin::Api,
    }
}

/// Knobs for [`Harness::build`]
pub struct Options {
    pub setting: Box<dyn FnOnce(&mut SendSetting)>,
    pub channel_enabled: bool,
    pub disabled_tenant: bool,
    pub rate_limit: u64,
    pub contact_limit: Option<i64>,
    pub ingest_capacity: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            setting: Box::new(|_| {}),
            channel_enabled: true,
            disabled_tenant: false,
            rate_limit: 1000,
            contact_limit: None,
            ingest_capacity: 10_000,
        }
    }
}

/// Every component wired over in-memory collaborators
pub struct Harness {
    pub tenant_id: TenantId,
    pub setting: SendSetting,
    pub store: Arc<MemoryStore>,
    pub cache: Arc<MemoryCache>,
    pub events: Arc<BroadcastEventBus>,
    pub conversations: Arc<MemoryConversationStore>,
    pub templates: Arc<PlaceholderRenderer>,
    pub reporter: Arc<MemoryErrorReporter>,
    pub metrics: Arc<Metrics>,
    pub status: Arc<StatusStore>,
    pub missing: Arc<MissingEventTracker>,
    pub dispatcher: Arc<SendDispatcher>,
    pub send: SendService,
    pub runner: Arc<CampaignRunner>,
    pub ingest: ContactIngestQueue,
}

impl Harness {
    pub async fn new() -> Self {
        Self::build(Options::default()).await
    }

    pub async fn with_setting(f: impl FnOnce(&mut SendSetting) + 'static) -> Self {
        Self::build(Options {
            setting: Box::new(f),
            ..Default::default()
        })
        .await
    }

    pub async fn with_channel_enabled(enabled: bool) -> Self {
        Self::build(Options {
            channel_enabled: enabled,
            ..Default::default()
        })
        .await
    }

    pub async fn with_disabled_tenant() -> Self {
        Self::build(Options {
            disabled_tenant: true,
            ..Default::default()
        })
        .await
    }

    pub async fn with_rate_limit(limit: u64) -> Self {
        Self::build(Options {
            rate_limit: limit,
            ..Default::default()
        })
        .await
    }

    pub async fn with_contact_limit(limit: i64) -> Self {
        Self::build(Options {
            contact_limit: Some(limit),
            ..Default::default()
        })
        .await
    }

    pub async fn with_ingest_capacity(capacity: usize) -> Self {
        Self::build(Options {
            ingest_capacity: capacity,
            ..Default::default()
        })
        .await
    }

    pub async fn build(options: Options) -> Self {
        let tenant_id = Uuid::new_v4();
        let mut setting = send_setting(tenant_id);
        (options.setting)(&mut setting);

        let store = Arc::new(MemoryStore::new());
        store.insert_send_setting(setting.clone()).await;

        let cache = Arc::new(MemoryCache::new());
        let events = Arc::new(BroadcastEventBus::default());
        let conversations =
            Arc::new(MemoryConversationStore::new().with_channel(CHANNEL_TOKEN, CHANNEL_ID));
        let templates = Arc::new(PlaceholderRenderer::new());
        let reporter = Arc::new(MemoryErrorReporter::new());
        let metrics = Arc::new(Metrics::new().unwrap());

        let channels = Arc::new(StaticChannelGateway::new(None).with_channel(
            CHANNEL_TOKEN,
            ChannelConfig {
                enabled: options.channel_enabled,
                workspace_id: "ws-1".to_string(),
                channel_id: CHANNEL_ID.to_string(),
                bot_id: Some("bot-1".to_string()),
                session_window_hours: Some(24),
            },
        ));
        let mut tenants = StaticTenantPolicy::new();
        if options.disabled_tenant {
            tenants = tenants.with_disabled(tenant_id);
        }
        if let Some(limit) = options.contact_limit {
            tenants = tenants.with_contact_limit(limit);
        }
        let tenants = Arc::new(tenants);

        let dispatch_config = DispatchConfig::default();
        let callbacks =
            Arc::new(CallbackNotifier::new(&CallbackConfig::default(), metrics.clone()).unwrap());
        let status = Arc::new(StatusStore::new(
            store.clone(),
            store.clone(),
            store.clone(),
            store.clone(),
            events.clone(),
            callbacks,
        ));
        let missing = Arc::new(MissingEventTracker::new(
            cache.clone(),
            store.clone(),
            store.clone(),
            events.clone(),
            &dispatch_config,
        ));
        let lock = Arc::new(DestinationLock::new(cache.clone(), &dispatch_config));

        let dispatcher = Arc::new(SendDispatcher::new(
            DispatcherDeps {
                settings: store.clone(),
                channels,
                conversations: conversations.clone(),
                templates: templates.clone(),
                tenants: tenants.clone(),
                status: status.clone(),
                missing: missing.clone(),
                lock,
                reporter: reporter.clone(),
                metrics: metrics.clone(),
            },
            dispatch_config.clone(),
        ));

        let limiter = Arc::new(RateLimiter::new(
            cache.clone(),
            reporter.clone(),
            metrics.clone(),
            &RateLimitConfig {
                max_per_window: options.rate_limit,
                window_secs: 60,
            },
        ));
        let send = SendService::new(
            store.clone(),
            tenants.clone(),
            status.clone(),
            limiter,
            events.clone(),
            cache.clone(),
            &dispatch_config,
        );

        let campaign_config = CampaignConfig {
            ingest_queue_capacity: options.ingest_capacity,
            ..Default::default()
        };
        let progress = Arc::new(ProgressTracker::new());
        let runner = Arc::new(CampaignRunner::new(
            store.clone(),
            store.clone(),
            tenants,
            dispatcher.clone(),
            cache.clone(),
            events.clone(),
            reporter.clone(),
            metrics.clone(),
            progress.clone(),
            &campaign_config,
        ));
        let ingest = ContactIngestQueue::new(
            store.clone(),
            store.clone(),
            progress,
            reporter.clone(),
            metrics.clone(),
            cache.clone(),
            &campaign_config,
        );

        Self {
            tenant_id,
            setting,
            store,
            cache,
            events,
            conversations,
            templates,
            reporter,
            metrics,
            status,
            missing,
            dispatcher,
            send,
            runner,
            ingest,
        }
    }

    /// Attempt input on the harness setting
    pub fn attempt(&self, conversation_id: &str, external_id: &str) -> CreateActiveMessage {
        CreateActiveMessage {
            tenant_id: self.tenant_id,
            send_setting_id: self.setting.id,
            conversation_id: Some(conversation_id.to_string()),
            channel_id: None,
            phone: "5511987654321".to_string(),
            external_id: external_id.to_string(),
            status_id: None,
            message_error: None,
            campaign_id: None,
        }
    }

    pub async fn tenant_status(&self, code: i32, name: &str) -> StatusId {
        StatusRepository::create(&*self.store, self.tenant_id, code, name)
            .await
            .unwrap()
            .id
    }

    /// Campaign on the harness setting with template `promo` and one
    /// `first_name` attribute, moved to `status`
    pub async fn campaign(&self, status: CampaignStatus, interval_secs: i32) -> Campaign {
        let campaign = CampaignRepository::create(
            &*self.store,
            CreateCampaign {
                tenant_id: self.tenant_id,
                name: "spring promo".to_string(),
                send_setting_id: Some(self.setting.id),
                template_id: Some("promo".to_string()),
                send_interval_secs: Some(interval_secs),
                scheduled_at: None,
                attributes: vec![("first_name".to_string(), "First name".to_string())],
            },
        )
        .await
        .unwrap();
        if status == CampaignStatus::Draft {
            return campaign;
        }
        self.store
            .update_status(campaign.id, status)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn add_contact(
        &self,
        campaign_id: CampaignId,
        phone: &str,
        attributes: &[(&str, &str)],
    ) -> CampaignContact {
        let phone = PhoneNumber::parse(phone).unwrap();
        let contact = self
            .store
            .upsert(self.tenant_id, phone.as_str(), None)
            .await
            .unwrap();
        let attributes: Vec<Attribute> = attributes
            .iter()
            .map(|(name, value)| Attribute::new(*name, *value))
            .collect();
        self.store
            .set_attributes(contact.id, campaign_id, &attributes)
            .await
            .unwrap();
        let hash = Uuid::new_v4().simple().to_string();
        self.store
            .add_to_campaign(campaign_id, contact.id, &hash)
            .await
            .unwrap();
        self.campaign_contact(&hash).await
    }

    pub async fn campaign_contact(&self, hash: &str) -> CampaignContact {
        self.store.find_by_hash(hash).await.unwrap().unwrap()
    }

    /// Seed an open conversation `conv-open` on the harness channel
    pub async fn open_conversation(&self, phone: &str) {
        self.open_conversation_with(phone, Vec::new()).await;
    }

    /// Like [`Harness::open_conversation`], with `extra` members joined
    pub async fn open_conversation_with(&self, phone: &str, extra: Vec<Member>) {
        let mut members = vec![
            Member::new("system", MemberKind::System),
            Member::new(phone, MemberKind::User),
        ];
        members.extend(extra);
        self.conversations
            .insert(Conversation {
                id: "conv-open".to_string(),
                tenant_id: self.tenant_id,
                channel_id: CHANNEL_ID.to_string(),
                phone: phone.to_string(),
                members,
                team_id: None,
                assigned_user_id: None,
                tags: Vec::new(),
                created_by_channel: None,
                open: true,
            })
            .await;
    }
}
