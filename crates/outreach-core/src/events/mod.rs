//! Event bus
//!
//! Cross-component signalling: send requests, status changes, inbound
//! delivery signals and campaign start triggers.

mod broadcast;

pub use broadcast::BroadcastEventBus;

use crate::dispatch::SendRequest;
use async_trait::async_trait;
use outreach_common::types::{CampaignId, StatusRef, TenantId};
use outreach_common::Result;
use outreach_storage::models::{ActiveMessage, DeliveryMark};
use serde::{Deserialize, Serialize};

/// Events produced by the core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    SendRequested(SendRequest),
    StatusChanged {
        tenant_id: TenantId,
        status: StatusRef,
        message: ActiveMessage,
    },
    UserReceived {
        message: ActiveMessage,
    },
    UserAnswered {
        message: ActiveMessage,
    },
    UserRead {
        message: ActiveMessage,
    },
    CampaignStartRequested {
        tenant_id: TenantId,
        campaign_id: CampaignId,
    },
}

impl Event {
    /// Typed inbound signal for a stamped delivery column
    pub fn delivery(mark: DeliveryMark, message: ActiveMessage) -> Self {
        match mark {
            DeliveryMark::Received => Event::UserReceived { message },
            DeliveryMark::Answered => Event::UserAnswered { message },
            DeliveryMark::Read => Event::UserRead { message },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::SendRequested(_) => "send_requested",
            Event::StatusChanged { .. } => "status_changed",
            Event::UserReceived { .. } => "user_received",
            Event::UserAnswered { .. } => "user_answered",
            Event::UserRead { .. } => "user_read",
            Event::CampaignStartRequested { .. } => "campaign_start_requested",
        }
    }
}

/// Publish/subscribe transport
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, event: Event) -> Result<()>;

    /// Receive every event published after this call
    fn subscribe(&self) -> Subscription;
}

/// Stream of events for one consumer
pub struct Subscription {
    receiver: tokio::sync::broadcast::Receiver<Event>,
}

impl Subscription {
    pub(crate) fn new(receiver: tokio::sync::broadcast::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// Next event, or `None` once the bus is gone.
    ///
    /// A consumer that falls behind skips the events it missed.
    pub async fn recv(&mut self) -> Option<Event> {
        use tokio::sync::broadcast::error::RecvError;

        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event consumer lagged, events dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next event without waiting
    pub fn try_recv(&mut self) -> Option<Event> {
        self.receiver.try_recv().ok()
    }
}
