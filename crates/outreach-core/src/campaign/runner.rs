//! Campaign Runner - Sequential dispatch of a campaign's contacts

use super::{CampaignError, ProgressTracker};
use crate::cache::{keys, Cache};
use crate::dispatch::{SendDispatcher, SendRequest};
use crate::events::{Event, EventBus};
use crate::gateway::{ErrorReporter, TenantPolicy};
use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use outreach_common::config::CampaignConfig;
use outreach_common::types::{Attribute, CampaignId, PhoneNumber, SendOrigin, TenantId};
use outreach_storage::models::{
    Campaign, CampaignAttribute, CampaignProgress, CampaignStatus, CreateCampaign,
    PendingCampaignContact,
};
use outreach_storage::repository::{CampaignRepository, ContactRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Summary of one `start` call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CampaignRun {
    pub sent: usize,
    pub failed: usize,
    /// Stopped by a pause before reaching the end
    pub paused: bool,
}

pub struct CampaignRunner {
    campaigns: Arc<dyn CampaignRepository>,
    contacts: Arc<dyn ContactRepository>,
    tenants: Arc<dyn TenantPolicy>,
    dispatcher: Arc<SendDispatcher>,
    cache: Arc<dyn Cache>,
    events: Arc<dyn EventBus>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<Metrics>,
    progress: Arc<ProgressTracker>,
    pause_flag_ttl: Duration,
}

impl CampaignRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        contacts: Arc<dyn ContactRepository>,
        tenants: Arc<dyn TenantPolicy>,
        dispatcher: Arc<SendDispatcher>,
        cache: Arc<dyn Cache>,
        events: Arc<dyn EventBus>,
        reporter: Arc<dyn ErrorReporter>,
        metrics: Arc<Metrics>,
        progress: Arc<ProgressTracker>,
        config: &CampaignConfig,
    ) -> Self {
        Self {
            campaigns,
            contacts,
            tenants,
            dispatcher,
            cache,
            events,
            reporter,
            metrics,
            progress,
            pause_flag_ttl: Duration::from_secs(config.pause_flag_ttl_secs),
        }
    }

    pub async fn create(&self, input: CreateCampaign) -> Result<Campaign, CampaignError> {
        if input.name.trim().is_empty() {
            return Err(outreach_common::Error::Validation(
                "Campaign name is required".to_string(),
            )
            .into());
        }
        if input.send_interval_secs.is_some_and(|s| s < 0) {
            return Err(outreach_common::Error::Validation(
                "Send interval must not be negative".to_string(),
            )
            .into());
        }
        let campaign = self.campaigns.create(input).await?;
        info!(campaign_id = %campaign.id, tenant_id = %campaign.tenant_id, "Campaign created");
        Ok(campaign)
    }

    pub async fn get(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        self.campaigns
            .get_by_tenant(tenant_id, campaign_id)
            .await?
            .ok_or(CampaignError::NotFound)
    }

    pub async fn list(
        &self,
        tenant_id: TenantId,
        status: Option<CampaignStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self
            .campaigns
            .list_by_tenant(tenant_id, status, limit, offset)
            .await?)
    }

    /// Move a draft to `awaiting_send`, optionally scheduling its start
    pub async fn mark_awaiting_send(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        scheduled_at: Option<DateTime<Utc>>,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get(tenant_id, campaign_id).await?;
        if campaign.status_enum() != Some(CampaignStatus::Draft) {
            return Err(CampaignError::InvalidState {
                action: "schedule",
                status: campaign.status,
            });
        }

        self.campaigns.set_scheduled(campaign_id, scheduled_at).await?;
        let updated = self
            .campaigns
            .update_status(campaign_id, CampaignStatus::AwaitingSend)
            .await?
            .ok_or(CampaignError::NotFound)?;

        info!(campaign_id = %campaign_id, scheduled_at = ?scheduled_at, "Campaign awaiting send");
        Ok(updated)
    }

    /// Move a scheduled campaign that cannot start back to draft and drop
    /// its schedule
    pub async fn unschedule(
        &self,
        campaign_id: CampaignId,
        reason: &CampaignError,
    ) -> Result<Campaign, CampaignError> {
        self.campaigns.set_scheduled(campaign_id, None).await?;
        let campaign = self
            .campaigns
            .update_status(campaign_id, CampaignStatus::Draft)
            .await?
            .ok_or(CampaignError::NotFound)?;
        warn!(campaign_id = %campaign_id, reason = %reason, "Scheduled campaign returned to draft");
        Ok(campaign)
    }

    /// Check that the campaign may start and queue the start on the bus
    pub async fn request_start(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get(tenant_id, campaign_id).await?;
        self.check_startable(&campaign).await?;

        self.events
            .publish(Event::CampaignStartRequested {
                tenant_id,
                campaign_id,
            })
            .await?;
        debug!(campaign_id = %campaign_id, "Campaign start requested");
        Ok(campaign)
    }

    /// Run the campaign until every pending contact was dispatched or a
    /// pause is observed
    pub async fn start(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<CampaignRun, CampaignError> {
        let campaign = self.get(tenant_id, campaign_id).await?;
        let (template_id, send_setting_id) = self.check_startable(&campaign).await?;

        let attributes = self.campaigns.attributes(campaign_id).await?;
        let pending = self.contacts.pending_for_campaign(campaign_id).await?;

        self.campaigns
            .update_status(campaign_id, CampaignStatus::Running)
            .await?;
        let pause_key = keys::campaign_pause(campaign_id);
        self.cache.del(&pause_key).await?;

        info!(
            campaign_id = %campaign_id,
            contacts = pending.len(),
            "Campaign running"
        );

        let interval = Duration::from_secs(campaign.send_interval_secs.max(0) as u64);
        let mut run = CampaignRun::default();
        let total = pending.len();

        for (index, member) in pending.iter().enumerate() {
            if self.take_pause_flag(campaign_id, &pause_key).await {
                info!(campaign_id = %campaign_id, sent = run.sent, "Campaign paused");
                run.paused = true;
                return Ok(run);
            }

            let request = match contact_request(
                &campaign,
                send_setting_id,
                &template_id,
                &attributes,
                member,
            ) {
                Ok(request) => request,
                Err(e) => {
                    warn!(
                        campaign_id = %campaign_id,
                        contact_id = %member.contact.id,
                        error = %e,
                        "Skipping campaign contact"
                    );
                    self.reporter.report("campaign_contact", &e.to_string());
                    run.failed += 1;
                    continue;
                }
            };

            match self.dispatcher.dispatch(&request).await {
                Ok(outcome) => {
                    if let Err(e) = self
                        .contacts
                        .mark_delivered(member.campaign_contact.id, Utc::now())
                        .await
                    {
                        warn!(
                            campaign_id = %campaign_id,
                            hash = %member.campaign_contact.hash,
                            error = %e,
                            "Failed to mark campaign contact delivered"
                        );
                        self.reporter.report("campaign_mark_delivered", &e.to_string());
                    }
                    self.metrics.campaign_contacts_sent_total.inc();
                    debug!(
                        campaign_id = %campaign_id,
                        hash = %member.campaign_contact.hash,
                        outcome = %outcome.label(),
                        "Campaign contact dispatched"
                    );
                    run.sent += 1;
                }
                Err(e) => {
                    error!(
                        campaign_id = %campaign_id,
                        hash = %member.campaign_contact.hash,
                        error = %e,
                        "Campaign contact dispatch failed"
                    );
                    self.reporter.report("campaign_dispatch", &e.to_string());
                    run.failed += 1;
                }
            }

            if index + 1 < total && !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        self.campaigns
            .update_status(campaign_id, CampaignStatus::FinishedComplete)
            .await?;
        info!(
            campaign_id = %campaign_id,
            sent = run.sent,
            failed = run.failed,
            "Campaign finished"
        );
        Ok(run)
    }

    /// Mark the campaign paused and signal a running loop to stop
    pub async fn pause(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<Campaign, CampaignError> {
        let campaign = self.get(tenant_id, campaign_id).await?;
        if campaign.status_enum() == Some(CampaignStatus::FinishedComplete) {
            return Err(CampaignError::InvalidState {
                action: "pause",
                status: campaign.status,
            });
        }

        let updated = self
            .campaigns
            .update_status(campaign_id, CampaignStatus::Paused)
            .await?
            .ok_or(CampaignError::NotFound)?;
        self.cache
            .set(
                &keys::campaign_pause(campaign_id),
                "1",
                Some(self.pause_flag_ttl),
            )
            .await?;

        info!(campaign_id = %campaign_id, "Campaign pause requested");
        Ok(updated)
    }

    /// Ingest progress: live counters when this process is ingesting,
    /// otherwise the persisted values
    pub async fn progress(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
    ) -> Result<CampaignProgress, CampaignError> {
        let campaign = self.get(tenant_id, campaign_id).await?;
        Ok(match self.progress.get(campaign_id) {
            Some(counters) => counters.snapshot(campaign.finished),
            None => CampaignProgress {
                processing_total: campaign.processing_total,
                processed_total: campaign.processed_total,
                finished: campaign.finished,
            },
        })
    }

    /// Campaigns awaiting send whose scheduled start has passed
    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, CampaignError> {
        Ok(self.campaigns.scheduled_ready(now).await?)
    }

    /// Consume a pending pause request. Cache failures count as no pause.
    async fn take_pause_flag(&self, campaign_id: CampaignId, key: &str) -> bool {
        match self.cache.get(key).await {
            Ok(Some(_)) => {
                if let Err(e) = self.cache.del(key).await {
                    warn!(campaign_id = %campaign_id, error = %e, "Failed to clear pause flag");
                }
                true
            }
            Ok(None) => false,
            Err(e) => {
                warn!(campaign_id = %campaign_id, error = %e, "Failed to read pause flag");
                self.reporter.report("campaign_pause_flag", &e.to_string());
                false
            }
        }
    }

    async fn check_startable(
        &self,
        campaign: &Campaign,
    ) -> Result<(String, outreach_common::types::SendSettingId), CampaignError> {
        let template_id = campaign
            .template_id
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(CampaignError::MissingTemplate)?;
        let send_setting_id = campaign
            .send_setting_id
            .ok_or(CampaignError::MissingSendSetting)?;

        match campaign.status_enum() {
            Some(CampaignStatus::AwaitingSend) | Some(CampaignStatus::Paused) => {}
            _ => {
                return Err(CampaignError::InvalidState {
                    action: "start",
                    status: campaign.status.clone(),
                })
            }
        }

        if let Some(limit) = self
            .tenants
            .campaign_contact_limit(campaign.tenant_id)
            .await?
        {
            let count = self.contacts.count_campaign_contacts(campaign.id).await?;
            if count > limit {
                return Err(CampaignError::ContactLimitExceeded { count, limit });
            }
        }

        Ok((template_id, send_setting_id))
    }
}

/// Send request for one campaign member, with every campaign attribute
/// filled from the contact's values
fn contact_request(
    campaign: &Campaign,
    send_setting_id: outreach_common::types::SendSettingId,
    template_id: &str,
    attributes: &[CampaignAttribute],
    member: &PendingCampaignContact,
) -> Result<SendRequest, CampaignError> {
    let values = attributes
        .iter()
        .map(|a| {
            member
                .attribute(&a.name)
                .map(|value| Attribute::new(a.name.clone(), value))
                .ok_or_else(|| CampaignError::MissingAttribute(a.name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let phone = PhoneNumber::parse(&member.contact.phone).ok_or_else(|| {
        outreach_common::Error::Validation(format!(
            "Invalid phone number: {}",
            member.contact.phone
        ))
    })?;

    Ok(SendRequest {
        tenant_id: campaign.tenant_id,
        send_setting_id,
        phone,
        is_valid: true,
        external_id: member.campaign_contact.hash.clone(),
        text: None,
        template_id: Some(template_id.to_string()),
        attributes: values,
        action: None,
        omit_action: false,
        team_id: None,
        user_id: None,
        tags: Vec::new(),
        origin: SendOrigin::Campaign {
            campaign_id: campaign.id,
        },
    })
}
