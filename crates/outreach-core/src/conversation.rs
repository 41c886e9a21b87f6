//! Conversation Resolver - Finds an open conversation for a destination

use crate::gateway::{ChannelConfig, Conversation, ConversationStore};
use outreach_common::types::{PhoneNumber, TenantId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Looks up an existing open conversation; never creates one
pub struct ConversationResolver {
    store: Arc<dyn ConversationStore>,
}

impl ConversationResolver {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Open conversation for `phone` on the channel, if any.
    ///
    /// The identity index (every phone spelling × channel token) is tried
    /// first; on error or no match the per-channel lookup by canonical number
    /// is used.
    pub async fn resolve(
        &self,
        tenant_id: TenantId,
        phone: &PhoneNumber,
        channel_token: &str,
        channel: &ChannelConfig,
    ) -> Option<Conversation> {
        match self
            .store
            .find_open_by_identities(&phone.variants(), channel_token)
            .await
        {
            Ok(Some(conversation)) => return Some(conversation),
            Ok(None) => debug!(phone = %phone, "No conversation in identity index"),
            Err(e) => warn!(phone = %phone, error = %e, "Identity lookup failed, falling back"),
        }

        match self
            .store
            .find_open_by_identity_and_channel(phone.as_str(), &channel.channel_id, tenant_id)
            .await
        {
            Ok(found) => found,
            Err(e) => {
                warn!(phone = %phone, error = %e, "Channel lookup failed");
                None
            }
        }
    }
}
