//! Rate Limiter - Fixed-window send counter per tenant

use crate::cache::{keys, Cache};
use crate::gateway::ErrorReporter;
use crate::metrics::Metrics;
use outreach_common::config::RateLimitConfig;
use outreach_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Rate limiter for controlling send rates per tenant.
///
/// Each window is one cache counter whose TTL is set by the first increment.
/// Bursts across a window boundary can pass up to twice the limit.
pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    reporter: Arc<dyn ErrorReporter>,
    metrics: Arc<Metrics>,
    limit: i64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(
        cache: Arc<dyn Cache>,
        reporter: Arc<dyn ErrorReporter>,
        metrics: Arc<Metrics>,
        config: &RateLimitConfig,
    ) -> Self {
        Self {
            cache,
            reporter,
            metrics,
            limit: config.max_per_window as i64,
            window: Duration::from_secs(config.window_secs),
        }
    }

    /// Count one send for the tenant and decide whether it may proceed.
    ///
    /// Rejected calls still count; nothing is refunded.
    pub async fn allow(&self, tenant_token: &str) -> Result<bool> {
        let key = keys::rate_limit(tenant_token);
        let count = self.cache.incr(&key).await?;

        if count == 1 {
            self.cache.expire(&key, self.window).await?;
        }

        if count <= self.limit {
            return Ok(true);
        }

        self.metrics.rate_limited_total.inc();

        if count == self.limit + 1 {
            warn!(
                tenant = tenant_token,
                limit = self.limit,
                "Rate limit reached for tenant"
            );
            self.reporter.alert(&format!(
                "Tenant {} exceeded {} sends per {}s",
                tenant_token,
                self.limit,
                self.window.as_secs()
            ));
        } else {
            debug!(tenant = tenant_token, count, "Rate limit hit");
        }

        Ok(false)
    }

    /// Sends left in the tenant's current window
    pub async fn remaining(&self, tenant_token: &str) -> Result<i64> {
        let used = self
            .cache
            .get(&keys::rate_limit(tenant_token))
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        Ok((self.limit - used).max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::gateway::MemoryErrorReporter;

    fn limiter(limit: u64) -> (RateLimiter, Arc<MemoryErrorReporter>) {
        let reporter = Arc::new(MemoryErrorReporter::new());
        let limiter = RateLimiter::new(
            Arc::new(MemoryCache::new()),
            reporter.clone(),
            Arc::new(Metrics::new().unwrap()),
            &RateLimitConfig {
                max_per_window: limit,
                window_secs: 60,
            },
        );
        (limiter, reporter)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_rejection_and_one_alert_past_limit() {
        let (limiter, reporter) = limiter(5);

        let mut rejected = 0;
        for _ in 0..6 {
            if !limiter.allow("tenant-a").await.unwrap() {
                rejected += 1;
            }
        }
        assert_eq!(rejected, 1);
        assert_eq!(reporter.alerts().len(), 1);

        for _ in 0..10 {
            assert!(!limiter.allow("tenant-a").await.unwrap());
        }
        assert_eq!(reporter.alerts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_ttl() {
        let (limiter, reporter) = limiter(2);

        assert!(limiter.allow("t").await.unwrap());
        assert!(limiter.allow("t").await.unwrap());
        assert!(!limiter.allow("t").await.unwrap());
        assert_eq!(limiter.remaining("t").await.unwrap(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.remaining("t").await.unwrap(), 2);
        assert!(limiter.allow("t").await.unwrap());

        // A new window may alert again
        assert!(limiter.allow("t").await.unwrap());
        assert!(!limiter.allow("t").await.unwrap());
        assert_eq!(reporter.alerts().len(), 2);
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let (limiter, _) = limiter(1);
        assert!(limiter.allow("a").await.unwrap());
        assert!(!limiter.allow("a").await.unwrap());
        assert!(limiter.allow("b").await.unwrap());
    }
}
