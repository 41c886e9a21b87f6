//! Destination lease
//!
//! Serializes sends to the same (tenant, phone) so two concurrent requests
//! cannot both find no conversation and open two.

use crate::cache::{keys, Cache};
use outreach_common::config::DispatchConfig;
use outreach_common::types::{PhoneNumber, TenantId};
use outreach_common::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Held lease; pass back to [`DestinationLock::release`]
#[derive(Debug)]
pub struct Lease {
    key: String,
    token: String,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Lease keyed by tenant and canonical phone, expiring on its own if the
/// holder dies
pub struct DestinationLock {
    cache: Arc<dyn Cache>,
    ttl: Duration,
    wait: Duration,
}

impl DestinationLock {
    pub fn new(cache: Arc<dyn Cache>, config: &DispatchConfig) -> Self {
        Self {
            cache,
            ttl: Duration::from_secs(config.lock_ttl_secs),
            wait: Duration::from_millis(config.lock_wait_ms),
        }
    }

    /// Acquire the lease, polling until the wait budget runs out
    pub async fn acquire(&self, tenant_id: TenantId, phone: &PhoneNumber) -> Result<Lease> {
        let key = keys::destination_lock(&tenant_id.to_string(), phone.as_str());
        let token = Uuid::new_v4().simple().to_string();
        let deadline = Instant::now() + self.wait;

        loop {
            if self.cache.set_if_absent(&key, &token, self.ttl).await? {
                debug!(key = %key, "Destination lease acquired");
                return Ok(Lease { key, token });
            }
            if Instant::now() >= deadline {
                warn!(key = %key, "Destination lease busy");
                return Err(Error::LockUnavailable(format!(
                    "Destination {} is busy",
                    phone
                )));
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Release the lease unless it already expired and was taken by someone
    /// else. Returns whether this holder still owned it.
    pub async fn release(&self, lease: Lease) -> Result<bool> {
        let released = self.cache.del_if_eq(&lease.key, &lease.token).await?;
        if !released {
            warn!(key = %lease.key, "Destination lease expired before release");
        }
        Ok(released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;

    fn lock(cache: Arc<MemoryCache>) -> DestinationLock {
        DestinationLock::new(
            cache,
            &DispatchConfig {
                lock_ttl_secs: 30,
                lock_wait_ms: 200,
                ..Default::default()
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_holder_times_out() {
        let lock = lock(Arc::new(MemoryCache::new()));
        let tenant = Uuid::new_v4();
        let phone = PhoneNumber::parse("11987654321").unwrap();

        let lease = lock.acquire(tenant, &phone).await.unwrap();
        let busy = lock.acquire(tenant, &phone).await;
        assert!(matches!(busy, Err(Error::LockUnavailable(_))));

        // other tenants are independent
        let other = lock.acquire(Uuid::new_v4(), &phone).await.unwrap();

        assert!(lock.release(lease).await.unwrap());
        assert!(lock.release(other).await.unwrap());
        let again = lock.acquire(tenant, &phone).await.unwrap();
        assert!(lock.release(again).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_lease_is_not_released_by_old_holder() {
        let cache = Arc::new(MemoryCache::new());
        let lock = lock(cache.clone());
        let tenant = Uuid::new_v4();
        let phone = PhoneNumber::parse("11987654321").unwrap();

        let stale = lock.acquire(tenant, &phone).await.unwrap();
        tokio::time::advance(Duration::from_secs(31)).await;

        let fresh = lock.acquire(tenant, &phone).await.unwrap();
        assert!(!lock.release(stale).await.unwrap());
        assert!(cache.get(fresh.key()).await.unwrap().is_some());
        assert!(lock.release(fresh).await.unwrap());
    }
}
