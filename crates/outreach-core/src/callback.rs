//! Callback Notifier - Signed status callbacks to tenant endpoints

use crate::metrics::Metrics;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use outreach_common::config::CallbackConfig;
use outreach_common::{Error, Result};
use outreach_storage::models::{ActiveMessage, SendSetting, Status};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "X-Outreach-Signature";

/// Body of a status callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCallback {
    pub external_id: String,
    pub phone: String,
    pub conversation_id: Option<String>,
    pub campaign_id: Option<uuid::Uuid>,
    pub status_code: i32,
    pub status_name: String,
    pub message_error: Option<String>,
    pub changed_at: DateTime<Utc>,
}

impl StatusCallback {
    pub fn new(message: &ActiveMessage, status: &Status) -> Self {
        Self {
            external_id: message.external_id.clone(),
            phone: message.phone.clone(),
            conversation_id: message.conversation_id.clone(),
            campaign_id: message.campaign_id,
            status_code: status.code,
            status_name: status.name.clone(),
            message_error: message.message_error.clone(),
            changed_at: message.status_changed_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Posts status changes to a send setting's callback URL.
///
/// Delivery is best effort: one attempt, short timeout, failures logged.
pub struct CallbackNotifier {
    http_client: Client,
    metrics: Arc<Metrics>,
    allow_private_targets: bool,
}

impl CallbackNotifier {
    pub fn new(config: &CallbackConfig, metrics: Arc<Metrics>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            metrics,
            allow_private_targets: config.allow_private_targets,
        })
    }

    /// Notify the setting's callback URL, if it has one
    pub async fn notify(&self, setting: &SendSetting, message: &ActiveMessage, status: &Status) {
        let Some(url) = setting.callback_url.as_deref().filter(|u| !u.is_empty()) else {
            return;
        };

        let payload = StatusCallback::new(message, status);
        if let Err(e) = self.post(url, &setting.api_token, &payload).await {
            self.metrics.callback_failures_total.inc();
            warn!(
                setting_id = %setting.id,
                external_id = %message.external_id,
                error = %e,
                "Status callback failed"
            );
        }
    }

    /// Notify from a background task so the caller never waits on the
    /// tenant endpoint. `None` when the setting has no callback URL.
    pub fn notify_detached(
        self: &Arc<Self>,
        setting: &SendSetting,
        message: &ActiveMessage,
        status: &Status,
    ) -> Option<JoinHandle<()>> {
        setting.callback_url.as_deref().filter(|u| !u.is_empty())?;

        let notifier = Arc::clone(self);
        let setting = setting.clone();
        let message = message.clone();
        let status = status.clone();
        Some(tokio::spawn(async move {
            notifier.notify(&setting, &message, &status).await;
        }))
    }

    async fn post(&self, url: &str, secret: &str, payload: &StatusCallback) -> Result<()> {
        if !self.allow_private_targets {
            validate_callback_url(url)?;
        }

        let body = serde_json::to_string(payload)
            .map_err(|e| Error::Internal(format!("Failed to encode callback: {}", e)))?;

        let signature = sign(secret, &body)?;

        let response = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, format!("sha256={}", signature))
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Delivery(format!(
                "Callback returned status {}",
                response.status()
            )));
        }

        debug!(url, external_id = %payload.external_id, "Status callback delivered");
        Ok(())
    }
}

/// Hex HMAC-SHA256 of `body` keyed by `secret`
pub fn sign(secret: &str, body: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Internal(format!("Invalid HMAC key: {}", e)))?;
    mac.update(body.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Reject callback URLs that point at internal networks
fn validate_callback_url(url_str: &str) -> Result<()> {
    let url = Url::parse(url_str)
        .map_err(|e| Error::Validation(format!("Invalid callback URL: {}", e)))?;

    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(Error::Validation(format!(
                "Callback URL scheme '{}' is not allowed",
                scheme
            )));
        }
    }

    let host = url
        .host_str()
        .ok_or_else(|| Error::Validation("Callback URL has no host".to_string()))?;

    let lower_host = host.to_lowercase();
    if lower_host == "localhost"
        || lower_host.ends_with(".local")
        || lower_host.ends_with(".internal")
    {
        return Err(Error::Validation(format!(
            "Callback URL host '{}' is not allowed",
            host
        )));
    }

    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if is_private_ip(&ip) {
            return Err(Error::Validation(format!(
                "Callback URL IP '{}' is in a private range",
                ip
            )));
        }
    }

    Ok(())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_loopback()
                || ipv4.is_private()
                || ipv4.is_link_local()
                || ipv4.is_broadcast()
                || ipv4.is_unspecified()
                || ipv4.octets()[0] == 100 && (ipv4.octets()[1] & 0xC0) == 64
        }
        IpAddr::V6(ipv6) => {
            ipv6.is_loopback()
                || ipv6.is_unspecified()
                || (ipv6.segments()[0] & 0xfe00) == 0xfc00
                || (ipv6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}
