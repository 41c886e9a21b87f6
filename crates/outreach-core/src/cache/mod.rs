//! Shared expiring key-value cache
//!
//! Counters, flags, markers and leases are all kept here. Every write may
//! carry a TTL; expiry is the only cleanup mechanism.

mod memory;

pub use memory::MemoryCache;

use async_trait::async_trait;
use outreach_common::Result;
use std::time::Duration;

/// Cache operations used by the dispatch and campaign components
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Set only when the key is absent. Returns whether the value was written.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Atomically increment an integer value, creating it at 1
    async fn incr(&self, key: &str) -> Result<i64>;

    /// Set a TTL on an existing key. Returns `false` when the key is missing.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool>;

    async fn del(&self, key: &str) -> Result<bool>;

    /// Delete the key only while it still holds `value`
    async fn del_if_eq(&self, key: &str, value: &str) -> Result<bool>;

    /// Set a hash field. Returns `true` when the field is new.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;

    /// Remove and return an arbitrary field of the hash
    async fn hpop(&self, key: &str) -> Result<Option<(String, String)>>;

    async fn hlen(&self, key: &str) -> Result<usize>;
}

/// Cache key builders shared across components
pub mod keys {
    use outreach_common::types::{CampaignId, SendSettingId};

    pub fn rate_limit(tenant_token: &str) -> String {
        format!("rate:{}", tenant_token)
    }

    pub fn missing(kind: &str, phone: &str, channel_id: &str) -> String {
        format!("missing:{}:{}:{}", kind, phone, channel_id)
    }

    pub fn destination_lock(tenant: &str, phone: &str) -> String {
        format!("lock:dest:{}:{}", tenant, phone)
    }

    pub fn external_id(send_setting_id: SendSettingId, external_id: &str) -> String {
        format!("send:ext:{}:{}", send_setting_id, external_id)
    }

    pub fn ingest_pending(campaign_id: CampaignId) -> String {
        format!("ingest:pending:{}", campaign_id)
    }

    pub fn ingest_in_flight(campaign_id: CampaignId) -> String {
        format!("ingest:inflight:{}", campaign_id)
    }

    pub fn ingest_drain(campaign_id: CampaignId) -> String {
        format!("ingest:drain:{}", campaign_id)
    }

    pub fn campaign_pause(campaign_id: CampaignId) -> String {
        format!("campaign:pause:{}", campaign_id)
    }
}
