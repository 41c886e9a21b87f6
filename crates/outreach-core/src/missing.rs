//! Missing Event Tracker - Pending delivery expectations
//!
//! After a send opens a conversation, one marker per expected signal
//! (received, answered, read) is written under every spelling of the phone.
//! Inbound provider callbacks consume them to stamp the attempt exactly once.

use crate::cache::{keys, Cache};
use crate::events::{Event, EventBus};
use chrono::Utc;
use outreach_common::config::DispatchConfig;
use outreach_common::types::{ActiveMessageId, PhoneNumber};
use outreach_common::Result;
use outreach_storage::models::{ActiveMessage, DeliveryMark};
use outreach_storage::repository::{ActiveMessageRepository, ContactRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

const MARKS: [DeliveryMark; 3] = [
    DeliveryMark::Received,
    DeliveryMark::Answered,
    DeliveryMark::Read,
];

pub struct MissingEventTracker {
    cache: Arc<dyn Cache>,
    messages: Arc<dyn ActiveMessageRepository>,
    contacts: Arc<dyn ContactRepository>,
    events: Arc<dyn EventBus>,
    ttl: Duration,
}

impl MissingEventTracker {
    pub fn new(
        cache: Arc<dyn Cache>,
        messages: Arc<dyn ActiveMessageRepository>,
        contacts: Arc<dyn ContactRepository>,
        events: Arc<dyn EventBus>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            cache,
            messages,
            contacts,
            events,
            ttl: Duration::from_secs(config.missing_marker_ttl_secs),
        }
    }

    /// Expect all three signals for `attempt_id`
    pub async fn register(
        &self,
        phone: &PhoneNumber,
        channel_id: &str,
        attempt_id: ActiveMessageId,
    ) -> Result<()> {
        let value = attempt_id.to_string();
        for mark in MARKS {
            for spelling in phone.variants() {
                let key = keys::missing(&mark.to_string(), &spelling, channel_id);
                self.cache.set(&key, &value, Some(self.ttl)).await?;
            }
        }
        debug!(phone = %phone, channel_id, attempt_id = %attempt_id, "Missing markers set");
        Ok(())
    }

    pub async fn check_missing_received(
        &self,
        phone: &PhoneNumber,
        channel_id: &str,
    ) -> Result<Option<ActiveMessage>> {
        self.check(DeliveryMark::Received, phone, channel_id).await
    }

    pub async fn check_missing_answered(
        &self,
        phone: &PhoneNumber,
        channel_id: &str,
    ) -> Result<Option<ActiveMessage>> {
        self.check(DeliveryMark::Answered, phone, channel_id).await
    }

    pub async fn check_missing_read(
        &self,
        phone: &PhoneNumber,
        channel_id: &str,
    ) -> Result<Option<ActiveMessage>> {
        self.check(DeliveryMark::Read, phone, channel_id).await
    }

    /// Consume the marker for `mark`, if any, and stamp its attempt
    pub async fn check(
        &self,
        mark: DeliveryMark,
        phone: &PhoneNumber,
        channel_id: &str,
    ) -> Result<Option<ActiveMessage>> {
        let kind = mark.to_string();
        let spellings = phone.variants();

        let mut attempt = None;
        for spelling in &spellings {
            if let Some(value) = self
                .cache
                .get(&keys::missing(&kind, spelling, channel_id))
                .await?
            {
                attempt = Some(value);
                break;
            }
        }
        let Some(value) = attempt else {
            return Ok(None);
        };

        for spelling in &spellings {
            self.cache
                .del(&keys::missing(&kind, spelling, channel_id))
                .await?;
        }

        let Ok(attempt_id) = Uuid::parse_str(&value) else {
            warn!(marker = %value, "Discarding malformed missing marker");
            return Ok(None);
        };

        let Some(message) = self
            .messages
            .mark_delivery(attempt_id, channel_id, mark, Utc::now())
            .await?
        else {
            debug!(attempt_id = %attempt_id, mark = %mark, "Attempt already stamped");
            return Ok(None);
        };

        if mark == DeliveryMark::Received && message.campaign_id.is_some() {
            self.contacts
                .mark_received_by_hash(&message.external_id, Utc::now())
                .await?;
        }

        info!(attempt_id = %message.id, mark = %mark, "Delivery signal recorded");
        if let Err(e) = self.events.publish(Event::delivery(mark, message.clone())).await {
            warn!(attempt_id = %message.id, error = %e, "Failed to publish delivery signal");
        }
        Ok(Some(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use outreach_storage::models::CampaignStatus;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_marker_consumed_once() {
        let h = Harness::new().await;
        let mut input = h.attempt("conv-1", "ext-1");
        input.channel_id = Some("chan-1".to_string());
        let message = h.status.record_attempt(input).await.unwrap();

        let phone = PhoneNumber::parse("11987654321").unwrap();
        h.missing.register(&phone, "chan-1", message.id).await.unwrap();
        let mut events = h.events.subscribe();

        // provider reports the spelling without the ninth digit
        let short = PhoneNumber::parse("551187654321").unwrap();
        let stamped = h
            .missing
            .check_missing_received(&short, "chan-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stamped.id, message.id);
        assert!(stamped.received_at.is_some());
        assert!(matches!(events.try_recv(), Some(Event::UserReceived { .. })));

        let again = h.missing.check_missing_received(&phone, "chan-1").await.unwrap();
        assert!(again.is_none());
        assert!(events.try_recv().is_none());

        // other kinds are still pending
        let read = h.missing.check_missing_read(&phone, "chan-1").await.unwrap();
        assert!(read.unwrap().read_at.is_some());
    }

    #[tokio::test]
    async fn test_other_channel_is_ignored() {
        let h = Harness::new().await;
        let mut input = h.attempt("conv-1", "ext-1");
        input.channel_id = Some("chan-1".to_string());
        let message = h.status.record_attempt(input).await.unwrap();

        let phone = PhoneNumber::parse("11987654321").unwrap();
        h.missing.register(&phone, "chan-1", message.id).await.unwrap();

        let other = h.missing.check_missing_answered(&phone, "chan-2").await.unwrap();
        assert!(other.is_none());
        let answered = h.missing.check_missing_answered(&phone, "chan-1").await.unwrap();
        assert!(answered.is_some());
    }

    #[tokio::test]
    async fn test_received_stamps_campaign_contact() {
        let h = Harness::new().await;
        let campaign = h.campaign(CampaignStatus::Running, 0).await;
        let member = h.add_contact(campaign.id, "11987654321", &[]).await;

        let mut input = h.attempt("conv-1", &member.hash);
        input.channel_id = Some("chan-1".to_string());
        input.campaign_id = Some(campaign.id);
        let message = h.status.record_attempt(input).await.unwrap();

        let phone = PhoneNumber::parse("11987654321").unwrap();
        h.missing.register(&phone, "chan-1", message.id).await.unwrap();
        h.missing.check_missing_received(&phone, "chan-1").await.unwrap();

        let member = h.campaign_contact(&member.hash).await;
        assert!(member.received_at.is_some());
    }
}
