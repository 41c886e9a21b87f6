//! Contact Ingest Queue - Bulk contact import
//!
//! Uploaded rows are queued per campaign in the shared cache, deduplicated
//! by phone, and persisted by [`ContactIngestQueue::process_campaign_contact`].
//! Taken rows stay in an in-flight hash until acked; a nack puts them back,
//! and a drain that died mid-way leaves them for the next drain to requeue.

use super::ProgressTracker;
use crate::cache::{keys, Cache};
use crate::gateway::ErrorReporter;
use crate::metrics::Metrics;
use outreach_common::config::CampaignConfig;
use outreach_common::types::{Attribute, CampaignId, PhoneNumber, TenantId};
use outreach_storage::models::{CampaignProgress, CampaignStatus};
use outreach_storage::repository::{CampaignRepository, ContactRepository};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Deliveries of one row before it is dropped
const MAX_ATTEMPTS: u32 = 3;

/// Lifetime of the per-campaign drain lease
const DRAIN_LEASE_TTL: Duration = Duration::from_secs(300);

/// Contact ingest errors
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Campaign not found")]
    CampaignNotFound,

    #[error("Campaign is finished")]
    CampaignFinished,

    #[error("Ingest queue is full ({capacity} rows)")]
    QueueFull { capacity: usize },

    #[error(transparent)]
    Storage(#[from] outreach_common::Error),
}

impl IngestError {
    pub fn status_code(&self) -> u16 {
        match self {
            IngestError::CampaignNotFound => 404,
            IngestError::CampaignFinished => 409,
            IngestError::QueueFull { .. } => 503,
            IngestError::Storage(e) => e.status_code(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            IngestError::CampaignNotFound => "CAMPAIGN_NOT_FOUND",
            IngestError::CampaignFinished => "CAMPAIGN_FINISHED",
            IngestError::QueueFull { .. } => "INGEST_QUEUE_FULL",
            IngestError::Storage(e) => e.code(),
        }
    }
}

/// One parsed upload row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRow {
    pub phone: String,
    pub name: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

/// Outcome of an enqueue call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// Rows queued under a phone not already pending
    pub queued: usize,
    /// Rows that replaced a pending row with the same phone
    pub replaced: usize,
    /// Rows whose phone could not be parsed
    pub rejected: usize,
}

/// A taken row awaiting ack or nack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    pub tag: String,
    pub row: ContactRow,
    pub attempt: u32,
}

/// Pending hash value: the row and the deliveries it already had
#[derive(Debug, Serialize, Deserialize)]
struct Queued {
    row: ContactRow,
    attempts: u32,
}

pub struct ContactIngestQueue {
    campaigns: Arc<dyn CampaignRepository>,
    contacts: Arc<dyn ContactRepository>,
    progress: Arc<ProgressTracker>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<Metrics>,
    cache: Arc<dyn Cache>,
    capacity: usize,
    batch_size: usize,
}

impl ContactIngestQueue {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        contacts: Arc<dyn ContactRepository>,
        progress: Arc<ProgressTracker>,
        reporter: Arc<dyn ErrorReporter>,
        metrics: Arc<Metrics>,
        cache: Arc<dyn Cache>,
        config: &CampaignConfig,
    ) -> Self {
        Self {
            campaigns,
            contacts,
            progress,
            reporter,
            metrics,
            cache,
            capacity: config.ingest_queue_capacity,
            batch_size: config.ingest_batch_size.max(1),
        }
    }

    /// Queue rows for a campaign. Only rows with a phone not already pending
    /// count towards the processing total.
    pub async fn enqueue(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        rows: Vec<ContactRow>,
    ) -> Result<IngestReceipt, IngestError> {
        let campaign = self
            .campaigns
            .get_by_tenant(tenant_id, campaign_id)
            .await?
            .ok_or(IngestError::CampaignNotFound)?;
        if campaign.status_enum() == Some(CampaignStatus::FinishedComplete) {
            return Err(IngestError::CampaignFinished);
        }

        let mut receipt = IngestReceipt::default();
        let mut parsed = Vec::with_capacity(rows.len());
        for mut row in rows {
            match PhoneNumber::parse(&row.phone) {
                Some(phone) => {
                    row.phone = phone.as_str().to_string();
                    parsed.push(row);
                }
                None => receipt.rejected += 1,
            }
        }

        let pending_key = keys::ingest_pending(campaign_id);
        let mut fresh = HashSet::new();
        for row in &parsed {
            if self.cache.hget(&pending_key, &row.phone).await?.is_none() {
                fresh.insert(row.phone.as_str());
            }
        }
        if self.pending_len(campaign_id).await? + fresh.len() > self.capacity {
            return Err(IngestError::QueueFull {
                capacity: self.capacity,
            });
        }

        for row in parsed {
            let value = encode(&Queued {
                row: row.clone(),
                attempts: 0,
            })?;
            if self.cache.hset(&pending_key, &row.phone, &value).await? {
                receipt.queued += 1;
            } else {
                receipt.replaced += 1;
            }
        }

        let counters = self.progress.counters(
            campaign_id,
            CampaignProgress {
                processing_total: campaign.processing_total,
                processed_total: campaign.processed_total,
                finished: campaign.finished,
            },
        );
        counters.add_processing(receipt.queued as i64);
        self.campaigns
            .update_progress(campaign_id, counters.snapshot(false))
            .await?;

        info!(
            campaign_id = %campaign_id,
            queued = receipt.queued,
            replaced = receipt.replaced,
            rejected = receipt.rejected,
            "Contacts queued"
        );
        Ok(receipt)
    }

    /// Rows waiting or in flight for the campaign
    pub async fn pending_len(&self, campaign_id: CampaignId) -> outreach_common::Result<usize> {
        let pending = self.cache.hlen(&keys::ingest_pending(campaign_id)).await?;
        let in_flight = self.cache.hlen(&keys::ingest_in_flight(campaign_id)).await?;
        Ok(pending + in_flight)
    }

    /// Take a pending row and hold it in flight
    pub async fn take(&self, campaign_id: CampaignId) -> outreach_common::Result<Option<Delivery>> {
        let Some((phone, value)) = self.cache.hpop(&keys::ingest_pending(campaign_id)).await?
        else {
            return Ok(None);
        };
        let queued: Queued = match serde_json::from_str(&value) {
            Ok(queued) => queued,
            Err(e) => {
                warn!(campaign_id = %campaign_id, phone = %phone, error = %e, "Dropping malformed queued row");
                return Ok(None);
            }
        };

        let delivery = Delivery {
            tag: Uuid::new_v4().simple().to_string(),
            row: queued.row,
            attempt: queued.attempts + 1,
        };
        self.cache
            .hset(
                &keys::ingest_in_flight(campaign_id),
                &delivery.tag,
                &encode(&delivery)?,
            )
            .await?;
        Ok(Some(delivery))
    }

    pub async fn ack(&self, campaign_id: CampaignId, tag: &str) -> outreach_common::Result<bool> {
        self.cache
            .hdel(&keys::ingest_in_flight(campaign_id), tag)
            .await
    }

    /// Return a row to the queue. A newer row for the same phone wins, and a
    /// row out of attempts is dropped. Returns whether it was requeued.
    pub async fn nack(&self, campaign_id: CampaignId, tag: &str) -> outreach_common::Result<bool> {
        let in_flight_key = keys::ingest_in_flight(campaign_id);
        let Some(value) = self.cache.hget(&in_flight_key, tag).await? else {
            return Ok(false);
        };
        self.cache.hdel(&in_flight_key, tag).await?;

        let Ok(delivery) = serde_json::from_str::<Delivery>(&value) else {
            return Ok(false);
        };
        if delivery.attempt >= MAX_ATTEMPTS {
            return Ok(false);
        }
        self.requeue(campaign_id, delivery).await
    }

    /// Put rows left in flight by an interrupted drain back in the queue
    async fn recover_in_flight(&self, campaign_id: CampaignId) -> outreach_common::Result<usize> {
        let in_flight_key = keys::ingest_in_flight(campaign_id);
        let mut recovered = 0;
        while let Some((_, value)) = self.cache.hpop(&in_flight_key).await? {
            if let Ok(delivery) = serde_json::from_str::<Delivery>(&value) {
                if self.requeue(campaign_id, delivery).await? {
                    recovered += 1;
                }
            }
        }
        if recovered > 0 {
            info!(campaign_id = %campaign_id, rows = recovered, "Requeued interrupted contacts");
        }
        Ok(recovered)
    }

    async fn requeue(&self, campaign_id: CampaignId, delivery: Delivery) -> outreach_common::Result<bool> {
        let pending_key = keys::ingest_pending(campaign_id);
        if self
            .cache
            .hget(&pending_key, &delivery.row.phone)
            .await?
            .is_some()
        {
            return Ok(false);
        }
        let phone = delivery.row.phone.clone();
        let value = encode(&Queued {
            row: delivery.row,
            attempts: delivery.attempt,
        })?;
        self.cache.hset(&pending_key, &phone, &value).await?;
        Ok(true)
    }

    /// Drain the campaign's queue into storage, persisting progress after
    /// each batch. `finished` is set once the queue is empty.
    pub async fn process_campaign_contact(
        &self,
        campaign_id: CampaignId,
    ) -> Result<CampaignProgress, IngestError> {
        let campaign = self
            .campaigns
            .get(campaign_id)
            .await?
            .ok_or(IngestError::CampaignNotFound)?;
        let counters = self.progress.counters(
            campaign_id,
            CampaignProgress {
                processing_total: campaign.processing_total,
                processed_total: campaign.processed_total,
                finished: campaign.finished,
            },
        );

        let lease = keys::ingest_drain(campaign_id);
        loop {
            if !self
                .cache
                .set_if_absent(&lease, "1", DRAIN_LEASE_TTL)
                .await?
            {
                debug!(campaign_id = %campaign_id, "Ingest already draining");
                return Ok(counters.snapshot(false));
            }
            let drained = match self.recover_in_flight(campaign_id).await {
                Ok(_) => self.drain(campaign.tenant_id, campaign_id).await,
                Err(e) => Err(e.into()),
            };
            self.cache.del(&lease).await?;
            drained?;

            // rows queued while the drain was finishing
            if self.pending_len(campaign_id).await? == 0 {
                break;
            }
        }

        let progress = counters.snapshot(true);
        self.campaigns.update_progress(campaign_id, progress).await?;
        info!(
            campaign_id = %campaign_id,
            processed = progress.processed_total,
            "Contact ingest finished"
        );
        Ok(progress)
    }

    async fn drain(&self, tenant_id: TenantId, campaign_id: CampaignId) -> Result<(), IngestError> {
        let counters = self.progress.counters(campaign_id, CampaignProgress::default());
        loop {
            let mut handled = 0;
            while handled < self.batch_size {
                let Some(delivery) = self.take(campaign_id).await? else {
                    break;
                };
                handled += 1;

                match self.persist(tenant_id, campaign_id, &delivery.row).await {
                    Ok(()) => {
                        self.ack(campaign_id, &delivery.tag).await?;
                        counters.add_processed(1);
                        self.metrics.contacts_ingested_total.inc();
                    }
                    Err(e) => {
                        warn!(
                            campaign_id = %campaign_id,
                            attempt = delivery.attempt,
                            error = %e,
                            "Failed to persist contact"
                        );
                        self.reporter.report("contact_ingest", &e.to_string());
                        if !self.nack(campaign_id, &delivery.tag).await? {
                            // dropped rows still count as processed
                            counters.add_processed(1);
                        }
                    }
                }
            }

            let empty = self.pending_len(campaign_id).await? == 0;
            self.campaigns
                .update_progress(campaign_id, counters.snapshot(false))
                .await?;
            if empty || handled == 0 {
                return Ok(());
            }
        }
    }

    async fn persist(
        &self,
        tenant_id: TenantId,
        campaign_id: CampaignId,
        row: &ContactRow,
    ) -> outreach_common::Result<()> {
        let contact = self
            .contacts
            .upsert(tenant_id, &row.phone, row.name.as_deref())
            .await?;
        self.contacts
            .set_attributes(contact.id, campaign_id, &row.attributes)
            .await?;

        let hash = Uuid::new_v4().simple().to_string();
        if !self
            .contacts
            .add_to_campaign(campaign_id, contact.id, &hash)
            .await?
        {
            debug!(campaign_id = %campaign_id, contact_id = %contact.id, "Contact already in campaign");
        }
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> outreach_common::Result<String> {
    serde_json::to_string(value)
        .map_err(|e| outreach_common::Error::Internal(format!("Failed to encode queued row: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use pretty_assertions::assert_eq;

    fn row(phone: &str, name: &str) -> ContactRow {
        ContactRow {
            phone: phone.to_string(),
            name: Some(name.to_string()),
            attributes: vec![Attribute::new("first_name", name)],
        }
    }

    #[tokio::test]
    async fn test_dedupe_last_write_wins() {
        let h = Harness::new().await;
        let campaign = h.campaign(CampaignStatus::Draft, 0).await;

        let receipt = h
            .ingest
            .enqueue(
                h.tenant_id,
                campaign.id,
                vec![
                    row("11911110001", "Ana"),
                    row("(11) 91111-0001", "Ana Maria"),
                    row("11911110002", "Bia"),
                    row("nope", "x"),
                ],
            )
            .await
            .unwrap();
        assert_eq!(
            receipt,
            IngestReceipt {
                queued: 2,
                replaced: 1,
                rejected: 1
            }
        );

        let progress = h.ingest.process_campaign_contact(campaign.id).await.unwrap();
        assert_eq!(
            progress,
            CampaignProgress {
                processing_total: 2,
                processed_total: 2,
                finished: true
            }
        );

        let contacts = h.store.contacts(h.tenant_id).await;
        let ana = contacts
            .iter()
            .find(|c| c.phone == "5511911110001")
            .unwrap();
        assert_eq!(ana.name.as_deref(), Some("Ana Maria"));
        assert_eq!(h.store.campaign_contacts().await.len(), 2);

        let stored = h.runner.progress(h.tenant_id, campaign.id).await.unwrap();
        assert!(stored.finished);
    }

    #[tokio::test]
    async fn test_reimport_is_idempotent() {
        let h = Harness::new().await;
        let campaign = h.campaign(CampaignStatus::Draft, 0).await;

        for _ in 0..2 {
            h.ingest
                .enqueue(h.tenant_id, campaign.id, vec![row("11911110001", "Ana")])
                .await
                .unwrap();
            h.ingest.process_campaign_contact(campaign.id).await.unwrap();
        }
        assert_eq!(h.store.campaign_contacts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_nack_requeues_until_attempts_run_out() {
        let h = Harness::new().await;
        let campaign = h.campaign(CampaignStatus::Draft, 0).await;
        h.ingest
            .enqueue(h.tenant_id, campaign.id, vec![row("11911110001", "Ana")])
            .await
            .unwrap();

        for attempt in 1..=MAX_ATTEMPTS {
            let delivery = h.ingest.take(campaign.id).await.unwrap().unwrap();
            assert_eq!(delivery.attempt, attempt);
            assert_eq!(h.ingest.pending_len(campaign.id).await.unwrap(), 1);
            let requeued = h.ingest.nack(campaign.id, &delivery.tag).await.unwrap();
            assert_eq!(requeued, attempt < MAX_ATTEMPTS);
        }
        assert!(h.ingest.take(campaign.id).await.unwrap().is_none());
        assert_eq!(h.ingest.pending_len(campaign.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_interrupted_drain_is_resumed_by_another_instance() {
        let h = Harness::new().await;
        let campaign = h.campaign(CampaignStatus::Draft, 0).await;
        h.ingest
            .enqueue(
                h.tenant_id,
                campaign.id,
                vec![row("11911110001", "Ana"), row("11911110002", "Bia")],
            )
            .await
            .unwrap();

        // taken by a process that went away before acking
        let lost = h.ingest.take(campaign.id).await.unwrap().unwrap();
        assert_eq!(lost.attempt, 1);

        let other = ContactIngestQueue::new(
            h.store.clone(),
            h.store.clone(),
            Arc::new(ProgressTracker::new()),
            h.reporter.clone(),
            h.metrics.clone(),
            h.cache.clone(),
            &CampaignConfig::default(),
        );
        let progress = other.process_campaign_contact(campaign.id).await.unwrap();
        assert!(progress.finished);
        assert_eq!(other.pending_len(campaign.id).await.unwrap(), 0);
        assert_eq!(h.store.campaign_contacts().await.len(), 2);
        assert!(h.cache.hlen(&keys::ingest_in_flight(campaign.id)).await.unwrap() == 0);
    }

    #[tokio::test]
    async fn test_import_over_limit_blocks_start() {
        let h = Harness::with_contact_limit(200).await;
        h.templates.register("promo", "Hi").await;
        let campaign = h.campaign(CampaignStatus::AwaitingSend, 0).await;

        let rows = (0..250)
            .map(|i| row(&format!("1191111{:04}", i), "Contact"))
            .collect();
        let receipt = h.ingest.enqueue(h.tenant_id, campaign.id, rows).await.unwrap();
        assert_eq!(receipt.queued, 250);

        h.ingest.process_campaign_contact(campaign.id).await.unwrap();
        let result = h.runner.start(h.tenant_id, campaign.id).await;
        assert!(matches!(
            result,
            Err(super::super::CampaignError::ContactLimitExceeded {
                count: 250,
                limit: 200
            })
        ));
    }

    #[tokio::test]
    async fn test_queue_is_bounded() {
        let h = Harness::with_ingest_capacity(2).await;
        let campaign = h.campaign(CampaignStatus::Draft, 0).await;

        let result = h
            .ingest
            .enqueue(
                h.tenant_id,
                campaign.id,
                vec![
                    row("11911110001", "A"),
                    row("11911110002", "B"),
                    row("11911110003", "C"),
                ],
            )
            .await;
        assert!(matches!(result, Err(IngestError::QueueFull { capacity: 2 })));
        assert_eq!(h.ingest.pending_len(campaign.id).await.unwrap(), 0);
    }
}
