//! Status Store - Send attempts and their status transitions

use crate::callback::CallbackNotifier;
use crate::events::{Event, EventBus};
use chrono::{DateTime, Months, Utc};
use outreach_common::types::{GlobalStatus, SendSettingId, StatusRef, TenantId};
use outreach_common::{Error, Result};
use outreach_storage::models::{
    ActiveMessage, ActiveMessageFilter, ActiveMessageWithStatus, CreateActiveMessage, SendSetting,
    Status,
};
use outreach_storage::repository::{
    ActiveMessageRepository, ContactRepository, SendSettingRepository, StatusRepository,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Widest created-at range a listing may span
pub const MAX_LISTING_MONTHS: u32 = 6;

/// Default and maximum page sizes for listings
pub const DEFAULT_LISTING_LIMIT: i64 = 100;
pub const MAX_LISTING_LIMIT: i64 = 1000;

/// Message error recorded by [`StatusStore::set_invalid`]
pub const INVALID_NUMBER_ERROR: &str = "invalid number";

/// Query for [`StatusStore::list_by_tenant_and_token`]
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub external_id: Option<String>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub status_changed_after: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Durable record of send attempts.
///
/// Every status change is followed by one `StatusChanged` event and, when
/// the setting has a callback URL, one signed callback.
pub struct StatusStore {
    messages: Arc<dyn ActiveMessageRepository>,
    statuses: Arc<dyn StatusRepository>,
    settings: Arc<dyn SendSettingRepository>,
    contacts: Arc<dyn ContactRepository>,
    events: Arc<dyn EventBus>,
    callbacks: Arc<CallbackNotifier>,
}

impl StatusStore {
    pub fn new(
        messages: Arc<dyn ActiveMessageRepository>,
        statuses: Arc<dyn StatusRepository>,
        settings: Arc<dyn SendSettingRepository>,
        contacts: Arc<dyn ContactRepository>,
        events: Arc<dyn EventBus>,
        callbacks: Arc<CallbackNotifier>,
    ) -> Self {
        Self {
            messages,
            statuses,
            settings,
            contacts,
            events,
            callbacks,
        }
    }

    /// Persist an attempt as given
    pub async fn record_attempt(&self, input: CreateActiveMessage) -> Result<ActiveMessage> {
        let message = self.messages.create(input).await?;
        debug!(
            attempt_id = %message.id,
            external_id = %message.external_id,
            "Send attempt recorded"
        );
        Ok(message)
    }

    /// Persist an attempt that already ended in a global failure status and
    /// notify about it
    pub async fn record_terminal(
        &self,
        setting: &SendSetting,
        mut input: CreateActiveMessage,
        status: GlobalStatus,
    ) -> Result<ActiveMessage> {
        let row = self.resolve(StatusRef::global(status)).await?;
        input.status_id = Some(row.id);
        // later status updates on the conversation must not reach this attempt
        input.message_error.get_or_insert_with(|| terminal_error(status));

        let message = self.messages.create(input).await?;
        info!(
            attempt_id = %message.id,
            external_id = %message.external_id,
            status = %status,
            "Send ended without delivery"
        );

        self.announce(setting, &message, &row).await;
        Ok(message)
    }

    /// Move the latest error-free attempt of a conversation to `status`.
    ///
    /// Returns the updated attempt, or `None` when no error-free attempt
    /// exists (a recorded failure is never overwritten).
    pub async fn set_status(
        &self,
        conversation_id: &str,
        tenant_id: TenantId,
        status: StatusRef,
    ) -> Result<Option<ActiveMessage>> {
        let row = self.resolve(status).await?;

        let changed = self
            .messages
            .update_status_by_conversation(conversation_id, tenant_id, row.id, Utc::now())
            .await?;
        if changed == 0 {
            debug!(conversation_id, code = row.code, "No attempt eligible for status");
            return Ok(None);
        }

        let Some(message) = self
            .messages
            .find_by_conversation_and_status(conversation_id, row.id)
            .await?
        else {
            return Ok(None);
        };

        match self.settings.get(message.send_setting_id).await? {
            Some(setting) => self.announce(&setting, &message, &row).await,
            None => warn!(attempt_id = %message.id, "Send setting of attempt is gone"),
        }
        Ok(Some(message))
    }

    /// Mark every attempt of a conversation as sent to an invalid number.
    ///
    /// Campaign contacts correlated by external id are flagged invalid too.
    pub async fn set_invalid(&self, conversation_id: &str) -> Result<Vec<ActiveMessage>> {
        let row = self.resolve(StatusRef::global(GlobalStatus::InvalidNumber)).await?;
        let updated = self
            .messages
            .mark_invalid(conversation_id, row.id, INVALID_NUMBER_ERROR, Utc::now())
            .await?;

        for message in &updated {
            if message.campaign_id.is_some() {
                self.contacts.mark_invalid_by_hash(&message.external_id).await?;
            }
            if let Some(setting) = self.settings.get(message.send_setting_id).await? {
                self.announce(&setting, message, &row).await;
            }
        }

        info!(conversation_id, attempts = updated.len(), "Conversation marked invalid");
        Ok(updated)
    }

    /// Sent messages of the setting identified by `api_token`
    pub async fn list_by_tenant_and_token(
        &self,
        tenant_id: TenantId,
        api_token: &str,
        query: MessageQuery,
    ) -> Result<Vec<ActiveMessageWithStatus>> {
        let setting = self
            .settings
            .find_by_api_token(api_token)
            .await?
            .filter(|s| s.tenant_id == tenant_id)
            .ok_or_else(|| Error::NotFound("Send setting not found".to_string()))?;

        let filter = listing_filter(query, Utc::now())?;
        self.messages
            .list_by_setting(tenant_id, setting.id, &filter)
            .await
    }

    pub async fn find_by_external_id(
        &self,
        send_setting_id: SendSettingId,
        external_id: &str,
    ) -> Result<Option<ActiveMessage>> {
        self.messages
            .find_by_external_id(send_setting_id, external_id)
            .await
    }

    async fn resolve(&self, status: StatusRef) -> Result<Status> {
        self.statuses
            .resolve(status)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Status {} not found", status.code())))
    }

    async fn announce(&self, setting: &SendSetting, message: &ActiveMessage, status: &Status) {
        let status_ref = match status.tenant_id {
            Some(tenant_id) => StatusRef::Tenant {
                tenant_id,
                code: status.code,
            },
            None => match GlobalStatus::from_code(status.code) {
                Some(global) => StatusRef::global(global),
                None => {
                    warn!(code = status.code, "Unknown global status code");
                    return;
                }
            },
        };

        if let Err(e) = self
            .events
            .publish(Event::StatusChanged {
                tenant_id: message.tenant_id,
                status: status_ref,
                message: message.clone(),
            })
            .await
        {
            warn!(attempt_id = %message.id, error = %e, "Failed to publish status change");
        }

        self.callbacks.notify_detached(setting, message, status);
    }
}

fn terminal_error(status: GlobalStatus) -> String {
    match status {
        GlobalStatus::InvalidNumber => INVALID_NUMBER_ERROR.to_string(),
        other => other.to_string(),
    }
}

/// Normalize a listing query, enforcing the created-at range cap
fn listing_filter(query: MessageQuery, now: DateTime<Utc>) -> Result<ActiveMessageFilter> {
    let to = query.created_to.unwrap_or(now);
    let earliest = to
        .checked_sub_months(Months::new(MAX_LISTING_MONTHS))
        .ok_or_else(|| Error::Validation("Invalid date range".to_string()))?;
    let from = query.created_from.unwrap_or(earliest);

    if from > to {
        return Err(Error::Validation(
            "created_from must not be after created_to".to_string(),
        ));
    }
    if from < earliest {
        return Err(Error::Validation(format!(
            "Date range must not exceed {} months",
            MAX_LISTING_MONTHS
        )));
    }

    Ok(ActiveMessageFilter {
        external_id: query.external_id,
        created_from: Some(from),
        created_to: Some(to),
        status_changed_after: query.status_changed_after,
        limit: query
            .limit
            .unwrap_or(DEFAULT_LISTING_LIMIT)
            .clamp(1, MAX_LISTING_LIMIT),
        offset: query.offset.unwrap_or(0).max(0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use chrono::Duration;
    use outreach_storage::models::CampaignStatus;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_listing_range_capped() {
        let now = Utc::now();
        let ok = listing_filter(
            MessageQuery {
                created_from: Some(now - Duration::days(30)),
                ..Default::default()
            },
            now,
        )
        .unwrap();
        assert_eq!(ok.created_to, Some(now));
        assert_eq!(ok.limit, DEFAULT_LISTING_LIMIT);

        let too_wide = listing_filter(
            MessageQuery {
                created_from: Some(now - Duration::days(200)),
                ..Default::default()
            },
            now,
        );
        assert!(matches!(too_wide, Err(Error::Validation(_))));

        let inverted = listing_filter(
            MessageQuery {
                created_from: Some(now),
                created_to: Some(now - Duration::days(1)),
                ..Default::default()
            },
            now,
        );
        assert!(inverted.is_err());
    }

    #[tokio::test]
    async fn test_set_status_emits_once_and_skips_errors() {
        let h = Harness::new().await;
        let tenant_status = h.tenant_status(7, "confirmed").await;

        let message = h
            .status
            .record_attempt(h.attempt("conv-1", "ext-1"))
            .await
            .unwrap();
        let mut events = h.events.subscribe();

        let updated = h
            .status
            .set_status(
                "conv-1",
                h.tenant_id,
                StatusRef::Tenant {
                    tenant_id: h.tenant_id,
                    code: 7,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, message.id);
        assert_eq!(updated.status_id, Some(tenant_status));
        assert!(matches!(events.try_recv(), Some(Event::StatusChanged { .. })));
        assert!(events.try_recv().is_none());

        h.status.set_invalid("conv-1").await.unwrap();
        let after_invalid = h
            .status
            .set_status(
                "conv-1",
                h.tenant_id,
                StatusRef::global(GlobalStatus::MessageSent),
            )
            .await
            .unwrap();
        assert!(after_invalid.is_none());
    }

    #[tokio::test]
    async fn test_unknown_tenant_status_is_not_found() {
        let h = Harness::new().await;
        let result = h
            .status
            .set_status(
                "conv-1",
                h.tenant_id,
                StatusRef::Tenant {
                    tenant_id: h.tenant_id,
                    code: 99,
                },
            )
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_campaign_hash_resolves_to_one_attempt() {
        let h = Harness::new().await;
        let campaign = h.campaign(CampaignStatus::AwaitingSend, 0).await;
        let contact = h.add_contact(campaign.id, "11987654321", &[]).await;

        let mut input = h.attempt("conv-9", &contact.hash);
        input.campaign_id = Some(campaign.id);
        h.status.record_attempt(input).await.unwrap();
        h.status
            .set_status("conv-9", h.tenant_id, StatusRef::global(GlobalStatus::MessageSent))
            .await
            .unwrap();

        let listed = h
            .status
            .list_by_tenant_and_token(
                h.tenant_id,
                &h.setting.api_token,
                MessageQuery {
                    external_id: Some(contact.hash.clone()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status_code, Some(-4));

        h.status.set_invalid("conv-9").await.unwrap();
        let member = h.campaign_contact(&contact.hash).await;
        assert!(member.invalid);
    }

    #[tokio::test]
    async fn test_listing_rejects_foreign_token() {
        let h = Harness::new().await;
        let result = h
            .status
            .list_by_tenant_and_token(uuid::Uuid::new_v4(), &h.setting.api_token, MessageQuery::default())
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }
}
