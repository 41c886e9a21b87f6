//! Inbound provider signals
//!
//! Delivery receipts, replies, read receipts, invalid-number reports and
//! tenant status codes arrive from channel integrations and move recorded
//! attempts through their states.

use crate::missing::MissingEventTracker;
use crate::status::StatusStore;
use outreach_common::types::{PhoneNumber, StatusRef, TenantId};
use outreach_common::{Error, Result};
use outreach_storage::models::{ActiveMessage, DeliveryMark};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// A signal reported by a channel integration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InboundSignal {
    Received { phone: String, channel_id: String },
    Answered { phone: String, channel_id: String },
    Read { phone: String, channel_id: String },
    Invalid { conversation_id: String },
    Status { conversation_id: String, code: i32 },
}

pub struct SignalIntake {
    status: Arc<StatusStore>,
    missing: Arc<MissingEventTracker>,
}

impl SignalIntake {
    pub fn new(status: Arc<StatusStore>, missing: Arc<MissingEventTracker>) -> Self {
        Self { status, missing }
    }

    /// Apply one signal. Returns the attempts it changed; an empty list
    /// means nothing was pending for it.
    pub async fn apply(
        &self,
        tenant_id: TenantId,
        signal: InboundSignal,
    ) -> Result<Vec<ActiveMessage>> {
        let touched = match signal {
            InboundSignal::Received { phone, channel_id } => {
                self.mark(DeliveryMark::Received, &phone, &channel_id).await?
            }
            InboundSignal::Answered { phone, channel_id } => {
                self.mark(DeliveryMark::Answered, &phone, &channel_id).await?
            }
            InboundSignal::Read { phone, channel_id } => {
                self.mark(DeliveryMark::Read, &phone, &channel_id).await?
            }
            InboundSignal::Invalid { conversation_id } => {
                self.status.set_invalid(&conversation_id).await?
            }
            InboundSignal::Status {
                conversation_id,
                code,
            } => {
                let status = StatusRef::from_code(tenant_id, code).ok_or_else(|| {
                    Error::Validation(format!("Unknown global status code {}", code))
                })?;
                self.status
                    .set_status(&conversation_id, tenant_id, status)
                    .await?
                    .into_iter()
                    .collect()
            }
        };

        debug!(tenant_id = %tenant_id, attempts = touched.len(), "Inbound signal applied");
        Ok(touched)
    }

    async fn mark(
        &self,
        mark: DeliveryMark,
        phone: &str,
        channel_id: &str,
    ) -> Result<Vec<ActiveMessage>> {
        let phone: PhoneNumber = phone.parse()?;
        let stamped = match mark {
            DeliveryMark::Received => self.missing.check_missing_received(&phone, channel_id).await?,
            DeliveryMark::Answered => self.missing.check_missing_answered(&phone, channel_id).await?,
            DeliveryMark::Read => self.missing.check_missing_read(&phone, channel_id).await?,
        };
        Ok(stamped.into_iter().collect())
    }
}
