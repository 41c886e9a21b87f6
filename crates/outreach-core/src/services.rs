//! Service wiring
//!
//! Builds every component from its collaborators so the server binary and
//! the HTTP tests share one assembly.

use crate::cache::{Cache, MemoryCache};
use crate::callback::CallbackNotifier;
use crate::campaign::{CampaignRunner, ContactIngestQueue, ProgressTracker};
use crate::dispatch::{DispatcherDeps, SendDispatcher, SendService};
use crate::events::{BroadcastEventBus, EventBus};
use crate::gateway::{
    ChannelGateway, ConversationStore, ErrorReporter, MemoryConversationStore,
    PlaceholderRenderer, StaticChannelGateway, StaticTenantPolicy, TemplateRenderer,
    TenantPolicy, TracingErrorReporter,
};
use crate::lock::DestinationLock;
use crate::metrics::Metrics;
use crate::missing::MissingEventTracker;
use crate::rate_limiter::RateLimiter;
use crate::signals::SignalIntake;
use crate::status::StatusStore;
use crate::worker::{CampaignScheduler, DispatchWorker};
use outreach_common::config::Config;
use outreach_common::Result;
use outreach_storage::memory::MemoryStore;
use outreach_storage::repository::{
    ActiveMessageRepository, CampaignRepository, ContactRepository, SendSettingRepository,
    StatusRepository,
};
use std::sync::Arc;

/// External collaborators of the core
#[derive(Clone)]
pub struct Backends {
    pub settings: Arc<dyn SendSettingRepository>,
    pub statuses: Arc<dyn StatusRepository>,
    pub messages: Arc<dyn ActiveMessageRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub contacts: Arc<dyn ContactRepository>,
    pub cache: Arc<dyn Cache>,
    pub events: Arc<dyn EventBus>,
    pub channels: Arc<dyn ChannelGateway>,
    pub conversations: Arc<dyn ConversationStore>,
    pub templates: Arc<dyn TemplateRenderer>,
    pub tenants: Arc<dyn TenantPolicy>,
    pub reporter: Arc<dyn ErrorReporter>,
}

impl Backends {
    /// Repositories from `store`; everything else in-process, channels and
    /// tenant policies taken from `[gateway]`
    pub fn in_memory(store: Arc<MemoryStore>, config: &Config, metrics: Arc<Metrics>) -> Self {
        let conversations = config.gateway.channels.iter().fold(
            MemoryConversationStore::new(),
            |store, (token, channel)| store.with_channel(token.clone(), channel.channel_id.clone()),
        );

        Self {
            settings: store.clone(),
            statuses: store.clone(),
            messages: store.clone(),
            campaigns: store.clone(),
            contacts: store,
            cache: Arc::new(MemoryCache::new()),
            events: Arc::new(BroadcastEventBus::default()),
            channels: Arc::new(StaticChannelGateway::from_config(&config.gateway)),
            conversations: Arc::new(conversations),
            templates: Arc::new(PlaceholderRenderer::new()),
            tenants: Arc::new(StaticTenantPolicy::from_config(&config.gateway)),
            reporter: Arc::new(TracingErrorReporter::new(metrics)),
        }
    }
}

/// Every core component, wired
pub struct Services {
    pub metrics: Arc<Metrics>,
    pub events: Arc<dyn EventBus>,
    pub conversations: Arc<dyn ConversationStore>,
    pub status: Arc<StatusStore>,
    pub missing: Arc<MissingEventTracker>,
    pub limiter: Arc<RateLimiter>,
    pub dispatcher: Arc<SendDispatcher>,
    pub send: Arc<SendService>,
    pub runner: Arc<CampaignRunner>,
    pub ingest: Arc<ContactIngestQueue>,
    pub signals: Arc<SignalIntake>,
    config: Config,
}

impl Services {
    pub fn build(backends: Backends, metrics: Arc<Metrics>, config: &Config) -> Result<Self> {
        let callbacks = Arc::new(CallbackNotifier::new(&config.callback, metrics.clone())?);

        let status = Arc::new(StatusStore::new(
            backends.messages.clone(),
            backends.statuses.clone(),
            backends.settings.clone(),
            backends.contacts.clone(),
            backends.events.clone(),
            callbacks,
        ));
        let missing = Arc::new(MissingEventTracker::new(
            backends.cache.clone(),
            backends.messages.clone(),
            backends.contacts.clone(),
            backends.events.clone(),
            &config.dispatch,
        ));
        let lock = Arc::new(DestinationLock::new(backends.cache.clone(), &config.dispatch));

        let dispatcher = Arc::new(SendDispatcher::new(
            DispatcherDeps {
                settings: backends.settings.clone(),
                channels: backends.channels.clone(),
                conversations: backends.conversations.clone(),
                templates: backends.templates.clone(),
                tenants: backends.tenants.clone(),
                status: status.clone(),
                missing: missing.clone(),
                lock,
                reporter: backends.reporter.clone(),
                metrics: metrics.clone(),
            },
            config.dispatch.clone(),
        ));

        let limiter = Arc::new(RateLimiter::new(
            backends.cache.clone(),
            backends.reporter.clone(),
            metrics.clone(),
            &config.rate_limit,
        ));
        let send = Arc::new(SendService::new(
            backends.settings.clone(),
            backends.tenants.clone(),
            status.clone(),
            limiter.clone(),
            backends.events.clone(),
            backends.cache.clone(),
            &config.dispatch,
        ));

        let progress = Arc::new(ProgressTracker::new());
        let runner = Arc::new(CampaignRunner::new(
            backends.campaigns.clone(),
            backends.contacts.clone(),
            backends.tenants.clone(),
            dispatcher.clone(),
            backends.cache.clone(),
            backends.events.clone(),
            backends.reporter.clone(),
            metrics.clone(),
            progress.clone(),
            &config.campaign,
        ));
        let ingest = Arc::new(ContactIngestQueue::new(
            backends.campaigns.clone(),
            backends.contacts.clone(),
            progress,
            backends.reporter.clone(),
            metrics.clone(),
            backends.cache.clone(),
            &config.campaign,
        ));

        let signals = Arc::new(SignalIntake::new(status.clone(), missing.clone()));

        Ok(Self {
            metrics,
            events: backends.events,
            conversations: backends.conversations,
            status,
            missing,
            limiter,
            dispatcher,
            send,
            runner,
            ingest,
            signals,
            config: config.clone(),
        })
    }

    /// Event consumer for sends and campaign starts, not yet spawned
    pub fn dispatch_worker(&self) -> Arc<DispatchWorker> {
        Arc::new(DispatchWorker::new(
            self.events.clone(),
            self.dispatcher.clone(),
            self.runner.clone(),
        ))
    }

    pub fn campaign_scheduler(&self) -> CampaignScheduler {
        CampaignScheduler::new(self.runner.clone())
            .with_poll_interval(self.config.campaign.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SendCommand;
    use crate::testing::send_setting;
    use outreach_common::config::ChannelSettings;
    use uuid::Uuid;

    fn config() -> Config {
        let mut config = Config::default();
        config.gateway.channels.insert(
            "main".to_string(),
            ChannelSettings {
                enabled: true,
                workspace_id: "ws-1".to_string(),
                channel_id: "chan-1".to_string(),
                bot_id: Some("bot-1".to_string()),
                session_window_hours: Some(24),
            },
        );
        config
    }

    #[tokio::test]
    async fn test_worker_dispatches_accepted_send() {
        let config = config();
        let metrics = Arc::new(Metrics::new().unwrap());
        let store = Arc::new(MemoryStore::new());
        let mut setting = send_setting(Uuid::new_v4());
        setting.channel_token = "main".to_string();
        store.insert_send_setting(setting.clone()).await;

        let services = Services::build(
            Backends::in_memory(store.clone(), &config, metrics.clone()),
            metrics,
            &config,
        )
        .unwrap();
        let worker = services.dispatch_worker().spawn();

        let accepted = services
            .send
            .submit(
                setting.tenant_id,
                SendCommand {
                    api_token: setting.api_token.clone(),
                    phone: "5511987654321".to_string(),
                    text: Some("hello".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let mut attempt = None;
        for _ in 0..50 {
            attempt = services
                .status
                .find_by_external_id(setting.id, accepted.external_id())
                .await
                .unwrap();
            if attempt.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        worker.abort();

        let attempt = attempt.expect("attempt recorded by the worker");
        assert!(attempt.conversation_id.is_some());
        assert_eq!(attempt.channel_id.as_deref(), Some("chan-1"));
    }
}
