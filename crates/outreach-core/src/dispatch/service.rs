//! Send Service - Synchronous accept path for single sends

use super::SendRequest;
use crate::cache::{keys, Cache};
use crate::events::{Event, EventBus};
use crate::gateway::TenantPolicy;
use crate::rate_limiter::RateLimiter;
use crate::status::StatusStore;
use outreach_common::config::DispatchConfig;
use outreach_common::types::{Attribute, PhoneNumber, SendOrigin, SendSettingId, TenantId};
use outreach_common::{Error, Result};
use outreach_storage::models::ActiveMessage;
use outreach_storage::repository::SendSettingRepository;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Caller-facing send input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SendCommand {
    pub api_token: String,
    pub phone: String,
    /// Upstream validation result; absent means valid
    pub is_valid: Option<bool>,
    pub external_id: Option<String>,
    pub text: Option<String>,
    pub template_id: Option<String>,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
    pub action: Option<String>,
    #[serde(default)]
    pub omit_action: bool,
    pub team_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Result of accepting a send
#[derive(Debug, Clone)]
pub enum Accepted {
    /// Queued for dispatch under `external_id`
    Queued { external_id: String },
    /// An attempt with the same external id already exists
    Existing { attempt: ActiveMessage },
    /// The external id is already queued and not dispatched yet
    InFlight { external_id: String },
}

impl Accepted {
    pub fn external_id(&self) -> &str {
        match self {
            Accepted::Queued { external_id } => external_id,
            Accepted::Existing { attempt } => &attempt.external_id,
            Accepted::InFlight { external_id } => external_id,
        }
    }
}

pub struct SendService {
    settings: Arc<dyn SendSettingRepository>,
    tenants: Arc<dyn TenantPolicy>,
    status: Arc<StatusStore>,
    limiter: Arc<RateLimiter>,
    events: Arc<dyn EventBus>,
    cache: Arc<dyn Cache>,
    reservation_ttl: Duration,
}

impl SendService {
    pub fn new(
        settings: Arc<dyn SendSettingRepository>,
        tenants: Arc<dyn TenantPolicy>,
        status: Arc<StatusStore>,
        limiter: Arc<RateLimiter>,
        events: Arc<dyn EventBus>,
        cache: Arc<dyn Cache>,
        config: &DispatchConfig,
    ) -> Self {
        Self {
            settings,
            tenants,
            status,
            limiter,
            events,
            cache,
            reservation_ttl: Duration::from_secs(config.external_id_ttl_secs),
        }
    }

    /// Validate and queue a send. Never waits for delivery.
    pub async fn submit(&self, tenant_id: TenantId, command: SendCommand) -> Result<Accepted> {
        let setting = self
            .settings
            .find_by_api_token(&command.api_token)
            .await?
            .filter(|s| s.tenant_id == tenant_id)
            .ok_or_else(|| Error::NotFound("Send setting not found".to_string()))?;

        if !self.limiter.allow(&tenant_id.to_string()).await? {
            return Err(Error::RateLimitExceeded);
        }

        if !setting.enabled {
            return Err(Error::SettingDisabled(setting.id.to_string()));
        }
        if self.tenants.is_tenant_disabled(tenant_id).await? {
            return Err(Error::TenantDisabled(tenant_id.to_string()));
        }

        let phone: PhoneNumber = command.phone.parse()?;

        let external_id = match command.external_id.filter(|e| !e.is_empty()) {
            Some(external_id) => {
                if let Some(attempt) = self
                    .status
                    .find_by_external_id(setting.id, &external_id)
                    .await?
                {
                    debug!(external_id = %external_id, "Send already recorded");
                    return Ok(Accepted::Existing { attempt });
                }
                if let Some(accepted) = self.reserve(setting.id, &external_id).await? {
                    return Ok(accepted);
                }
                external_id
            }
            None => Uuid::new_v4().to_string(),
        };

        let request = SendRequest {
            tenant_id,
            send_setting_id: setting.id,
            phone,
            is_valid: command.is_valid.unwrap_or(true),
            external_id: external_id.clone(),
            text: command.text,
            template_id: command.template_id,
            attributes: command.attributes,
            action: command.action,
            omit_action: command.omit_action,
            team_id: command.team_id,
            user_id: command.user_id,
            tags: command.tags,
            origin: SendOrigin::Api,
        };
        self.events.publish(Event::SendRequested(request)).await?;

        info!(tenant_id = %tenant_id, external_id = %external_id, "Send accepted");
        Ok(Accepted::Queued { external_id })
    }

    /// Claim a caller-supplied external id for one queued send.
    ///
    /// Returns the answer for the caller when another submit holds it.
    async fn reserve(
        &self,
        send_setting_id: SendSettingId,
        external_id: &str,
    ) -> Result<Option<Accepted>> {
        let key = keys::external_id(send_setting_id, external_id);
        if self
            .cache
            .set_if_absent(&key, "queued", self.reservation_ttl)
            .await?
        {
            return Ok(None);
        }

        // the first send may have been dispatched in the meantime
        let accepted = match self
            .status
            .find_by_external_id(send_setting_id, external_id)
            .await?
        {
            Some(attempt) => Accepted::Existing { attempt },
            None => Accepted::InFlight {
                external_id: external_id.to_string(),
            },
        };
        debug!(external_id, "External id already reserved");
        Ok(Some(accepted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use pretty_assertions::assert_eq;

    fn command(h: &Harness) -> SendCommand {
        SendCommand {
            api_token: h.setting.api_token.clone(),
            phone: "(11) 98765-4321".to_string(),
            text: Some("hello".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_submit_queues_request() {
        let h = Harness::new().await;
        let mut events = h.events.subscribe();

        let accepted = h.send.submit(h.tenant_id, command(&h)).await.unwrap();
        let Accepted::Queued { external_id } = accepted else {
            panic!("expected a queued send");
        };
        assert!(Uuid::parse_str(&external_id).is_ok());

        let Some(Event::SendRequested(request)) = events.try_recv() else {
            panic!("expected a send request");
        };
        assert_eq!(request.external_id, external_id);
        assert_eq!(request.phone.as_str(), "5511987654321");
        assert!(request.is_valid);
    }

    #[tokio::test]
    async fn test_known_external_id_is_not_requeued() {
        let h = Harness::new().await;
        h.status
            .record_attempt(h.attempt("conv-1", "ext-1"))
            .await
            .unwrap();
        let mut events = h.events.subscribe();

        let mut cmd = command(&h);
        cmd.external_id = Some("ext-1".to_string());
        let accepted = h.send.submit(h.tenant_id, cmd).await.unwrap();
        assert!(matches!(accepted, Accepted::Existing { .. }));
        assert_eq!(accepted.external_id(), "ext-1");
        assert!(events.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_repeated_external_id_queued_once() {
        let h = Harness::new().await;
        let mut events = h.events.subscribe();

        let mut cmd = command(&h);
        cmd.external_id = Some("dup".to_string());
        let first = h.send.submit(h.tenant_id, cmd.clone()).await.unwrap();
        let second = h.send.submit(h.tenant_id, cmd.clone()).await.unwrap();

        assert!(matches!(first, Accepted::Queued { .. }));
        assert!(matches!(second, Accepted::InFlight { .. }));
        assert_eq!(second.external_id(), "dup");
        assert!(matches!(events.try_recv(), Some(Event::SendRequested(_))));
        assert!(events.try_recv().is_none());

        // once dispatched the reservation resolves to the attempt
        let recorded = h
            .status
            .record_attempt(h.attempt("conv-1", "dup"))
            .await
            .unwrap();
        let third = h.send.submit(h.tenant_id, cmd).await.unwrap();
        let Accepted::Existing { attempt } = third else {
            panic!("expected the recorded attempt");
        };
        assert_eq!(attempt.id, recorded.id);
    }

    #[tokio::test]
    async fn test_wrong_tenant_and_bad_phone() {
        let h = Harness::new().await;
        let result = h.send.submit(Uuid::new_v4(), command(&h)).await;
        assert!(matches!(result, Err(Error::NotFound(_))));

        let mut cmd = command(&h);
        cmd.phone = "12".to_string();
        let result = h.send.submit(h.tenant_id, cmd).await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_rate_limit_rejects() {
        let h = Harness::with_rate_limit(1).await;
        h.send.submit(h.tenant_id, command(&h)).await.unwrap();
        let result = h.send.submit(h.tenant_id, command(&h)).await;
        assert!(matches!(result, Err(Error::RateLimitExceeded)));
        assert_eq!(h.reporter.alerts().len(), 1);
    }
}
