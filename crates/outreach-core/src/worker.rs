//! Background workers
//!
//! [`DispatchWorker`] consumes send and campaign-start requests from the
//! event bus; [`CampaignScheduler`] starts campaigns whose scheduled time
//! has passed.

use crate::campaign::CampaignRunner;
use crate::dispatch::{SendDispatcher, SendRequest};
use crate::events::{Event, EventBus, Subscription};
use chrono::Utc;
use outreach_common::types::{CampaignId, TenantId};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};

/// Event consumer for queued sends and campaign starts
pub struct DispatchWorker {
    events: Arc<dyn EventBus>,
    dispatcher: Arc<SendDispatcher>,
    runner: Arc<CampaignRunner>,
    /// Campaigns with a loop running in this process
    running: Mutex<HashSet<CampaignId>>,
    /// Maximum concurrent single sends
    concurrency_limit: usize,
}

impl DispatchWorker {
    pub fn new(
        events: Arc<dyn EventBus>,
        dispatcher: Arc<SendDispatcher>,
        runner: Arc<CampaignRunner>,
    ) -> Self {
        Self {
            events,
            dispatcher,
            runner,
            running: Mutex::new(HashSet::new()),
            concurrency_limit: 16,
        }
    }

    /// Set concurrency limit
    pub fn with_concurrency_limit(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit.max(1);
        self
    }

    /// Subscribe now and consume in a background task
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        let subscription = self.events.subscribe();
        tokio::spawn(async move { self.run(subscription).await })
    }

    async fn run(self: Arc<Self>, mut subscription: Subscription) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency_limit));
        info!(
            "Dispatch worker started (concurrency: {})",
            self.concurrency_limit
        );

        while let Some(event) = subscription.recv().await {
            match event {
                Event::SendRequested(request) => {
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let worker = self.clone();
                    tokio::spawn(async move {
                        worker.dispatch(&request).await;
                        drop(permit);
                    });
                }
                Event::CampaignStartRequested {
                    tenant_id,
                    campaign_id,
                } => {
                    self.clone().start_campaign(tenant_id, campaign_id);
                }
                other => debug!(kind = other.kind(), "Ignoring event"),
            }
        }

        warn!("Event bus closed, dispatch worker stopping");
    }

    /// Dispatch one queued send, logging the outcome
    pub async fn dispatch(&self, request: &SendRequest) {
        match self.dispatcher.dispatch(request).await {
            Ok(outcome) => debug!(
                external_id = %request.external_id,
                outcome = %outcome.label(),
                "Queued send dispatched"
            ),
            Err(e) => error!(
                external_id = %request.external_id,
                error = %e,
                "Queued send failed"
            ),
        }
    }

    /// Run the campaign in its own task unless it is already running here
    pub fn start_campaign(
        self: Arc<Self>,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Option<JoinHandle<()>> {
        if !self.claim(campaign_id) {
            debug!(campaign_id = %campaign_id, "Campaign already running");
            return None;
        }

        Some(tokio::spawn(async move {
            match self.runner.start(tenant_id, campaign_id).await {
                Ok(run) => info!(
                    campaign_id = %campaign_id,
                    sent = run.sent,
                    failed = run.failed,
                    paused = run.paused,
                    "Campaign run ended"
                ),
                Err(e) => error!(campaign_id = %campaign_id, error = %e, "Campaign run failed"),
            }
            self.release(campaign_id);
        }))
    }

    fn claim(&self, campaign_id: CampaignId) -> bool {
        self.running
            .lock()
            .map(|mut running| running.insert(campaign_id))
            .unwrap_or(false)
    }

    fn release(&self, campaign_id: CampaignId) {
        if let Ok(mut running) = self.running.lock() {
            running.remove(&campaign_id);
        }
    }
}

/// Periodic starter for scheduled campaigns
pub struct CampaignScheduler {
    runner: Arc<CampaignRunner>,
    /// Interval between checks (seconds)
    poll_interval_secs: u64,
}

impl CampaignScheduler {
    pub fn new(runner: Arc<CampaignRunner>) -> Self {
        Self {
            runner,
            poll_interval_secs: 30,
        }
    }

    /// Set poll interval
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs.max(1);
        self
    }

    pub async fn run(&self) {
        let mut ticker = interval(Duration::from_secs(self.poll_interval_secs));
        info!(
            "Campaign scheduler started (interval: {}s)",
            self.poll_interval_secs
        );

        loop {
            ticker.tick().await;
            let started = self.tick().await;
            if started > 0 {
                debug!(started, "Scheduled campaigns requested");
            }
        }
    }

    /// Request a start for every due campaign. Returns how many were
    /// requested.
    pub async fn tick(&self) -> usize {
        let due = match self.runner.due(Utc::now()).await {
            Ok(due) => due,
            Err(e) => {
                error!("Error loading scheduled campaigns: {}", e);
                return 0;
            }
        };

        let mut requested = 0;
        for campaign in due {
            match self.runner.request_start(campaign.tenant_id, campaign.id).await {
                Ok(_) => requested += 1,
                Err(e) if e.is_transient() => warn!(
                    campaign_id = %campaign.id,
                    error = %e,
                    "Scheduled campaign start failed, retrying next tick"
                ),
                // refused starts would be refused again on every tick
                Err(e) => {
                    if let Err(unscheduled) = self.runner.unschedule(campaign.id, &e).await {
                        error!(
                            campaign_id = %campaign.id,
                            error = %unscheduled,
                            "Failed to unschedule campaign"
                        );
                    }
                }
            }
        }
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{request, Harness};
    use outreach_storage::models::CampaignStatus;
    use pretty_assertions::assert_eq;

    fn worker(h: &Harness) -> Arc<DispatchWorker> {
        Arc::new(DispatchWorker::new(
            h.events.clone(),
            h.dispatcher.clone(),
            h.runner.clone(),
        ))
    }

    #[tokio::test]
    async fn test_worker_dispatches_queued_send() {
        let h = Harness::new().await;
        let handle = worker(&h).spawn();
        let mut statuses = h.events.subscribe();

        let mut req = request(&h.setting, "11987654321");
        req.text = Some("hello".to_string());
        h.events.publish(Event::SendRequested(req)).await.unwrap();

        loop {
            match statuses.recv().await {
                Some(Event::StatusChanged { .. }) => break,
                Some(_) => continue,
                None => panic!("bus closed"),
            }
        }
        assert_eq!(h.store.active_messages().await.len(), 1);
        handle.abort();
    }

    #[tokio::test]
    async fn test_campaign_runs_once_at_a_time() {
        let h = Harness::new().await;
        h.templates.register("promo", "Hi {{first_name}}").await;
        let campaign = h.campaign(CampaignStatus::AwaitingSend, 0).await;
        h.add_contact(campaign.id, "11911110001", &[("first_name", "Ana")])
            .await;

        let worker = worker(&h);
        let first = worker
            .clone()
            .start_campaign(h.tenant_id, campaign.id)
            .unwrap();
        assert!(worker
            .clone()
            .start_campaign(h.tenant_id, campaign.id)
            .is_none());
        first.await.unwrap();

        let finished = h.runner.get(h.tenant_id, campaign.id).await.unwrap();
        assert_eq!(finished.status_enum(), Some(CampaignStatus::FinishedComplete));
        assert!(!worker.running.lock().unwrap().contains(&campaign.id));
    }

    #[tokio::test]
    async fn test_scheduler_requests_due_campaigns() {
        let h = Harness::new().await;
        let campaign = h.campaign(CampaignStatus::Draft, 0).await;
        h.runner
            .mark_awaiting_send(
                h.tenant_id,
                campaign.id,
                Some(Utc::now() - chrono::Duration::minutes(1)),
            )
            .await
            .unwrap();
        let later = h.campaign(CampaignStatus::Draft, 0).await;
        h.runner
            .mark_awaiting_send(
                h.tenant_id,
                later.id,
                Some(Utc::now() + chrono::Duration::hours(1)),
            )
            .await
            .unwrap();

        let mut events = h.events.subscribe();
        let scheduler = CampaignScheduler::new(h.runner.clone());
        assert_eq!(scheduler.tick().await, 1);
        let Some(Event::CampaignStartRequested { campaign_id, .. }) = events.try_recv() else {
            panic!("expected a start request");
        };
        assert_eq!(campaign_id, campaign.id);
    }

    #[tokio::test]
    async fn test_refused_scheduled_start_returns_to_draft() {
        let h = Harness::with_contact_limit(1).await;
        let campaign = h.campaign(CampaignStatus::Draft, 0).await;
        h.add_contact(campaign.id, "11911110001", &[]).await;
        h.add_contact(campaign.id, "11911110002", &[]).await;
        h.runner
            .mark_awaiting_send(
                h.tenant_id,
                campaign.id,
                Some(Utc::now() - chrono::Duration::minutes(1)),
            )
            .await
            .unwrap();

        let mut events = h.events.subscribe();
        let scheduler = CampaignScheduler::new(h.runner.clone());
        assert_eq!(scheduler.tick().await, 0);
        assert!(events.try_recv().is_none());

        let draft = h.runner.get(h.tenant_id, campaign.id).await.unwrap();
        assert_eq!(draft.status_enum(), Some(CampaignStatus::Draft));
        assert!(draft.scheduled_at.is_none());
        assert!(h.runner.due(Utc::now()).await.unwrap().is_empty());
        assert_eq!(scheduler.tick().await, 0);
    }
}
