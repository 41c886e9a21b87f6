//! In-process event bus over a broadcast channel

use super::{Event, EventBus, Subscription};
use async_trait::async_trait;
use outreach_common::Result;
use tokio::sync::broadcast;
use tracing::debug;

/// Event bus backed by `tokio::sync::broadcast`
pub struct BroadcastEventBus {
    sender: broadcast::Sender<Event>,
}

impl BroadcastEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for BroadcastEventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for BroadcastEventBus {
    async fn publish(&self, event: Event) -> Result<()> {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(receivers) => debug!(kind, receivers, "Event published"),
            // No subscriber yet; nothing to deliver to
            Err(_) => debug!(kind, "Event published without subscribers"),
        }
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        Subscription::new(self.sender.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = BroadcastEventBus::new(8);
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        let campaign_id = Uuid::new_v4();
        bus.publish(Event::CampaignStartRequested {
            tenant_id: Uuid::new_v4(),
            campaign_id,
        })
        .await
        .unwrap();

        for sub in [&mut first, &mut second] {
            match sub.recv().await {
                Some(Event::CampaignStartRequested { campaign_id: id, .. }) => {
                    assert_eq!(id, campaign_id)
                }
                other => panic!("unexpected event: {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let bus = BroadcastEventBus::default();
        let result = bus
            .publish(Event::CampaignStartRequested {
                tenant_id: Uuid::new_v4(),
                campaign_id: Uuid::new_v4(),
            })
            .await;
        assert!(result.is_ok());
    }
}
