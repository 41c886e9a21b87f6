//! Prometheus metrics

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Counters for the dispatch and campaign components
pub struct Metrics {
    registry: Registry,
    /// Dispatch outcomes, labelled by status
    pub sends_total: IntCounterVec,
    pub rate_limited_total: IntCounter,
    pub alerts_total: IntCounter,
    pub callback_failures_total: IntCounter,
    pub campaign_contacts_sent_total: IntCounter,
    pub contacts_ingested_total: IntCounter,
    pub reported_errors_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let metrics = Self {
            sends_total: IntCounterVec::new(
                Opts::new("outreach_sends_total", "Dispatched sends by outcome"),
                &["outcome"],
            )?,
            rate_limited_total: IntCounter::new(
                "outreach_rate_limited_total",
                "Sends rejected by the tenant rate limit",
            )?,
            alerts_total: IntCounter::new("outreach_alerts_total", "Operational alerts raised")?,
            callback_failures_total: IntCounter::new(
                "outreach_callback_failures_total",
                "Status callbacks that could not be delivered",
            )?,
            campaign_contacts_sent_total: IntCounter::new(
                "outreach_campaign_contacts_sent_total",
                "Campaign contacts dispatched",
            )?,
            contacts_ingested_total: IntCounter::new(
                "outreach_contacts_ingested_total",
                "Imported contacts persisted",
            )?,
            reported_errors_total: IntCounterVec::new(
                Opts::new("outreach_reported_errors_total", "Absorbed errors by context"),
                &["context"],
            )?,
            registry,
        };

        metrics.registry.register(Box::new(metrics.sends_total.clone()))?;
        metrics
            .registry
            .register(Box::new(metrics.rate_limited_total.clone()))?;
        metrics.registry.register(Box::new(metrics.alerts_total.clone()))?;
        metrics
            .registry
            .register(Box::new(metrics.callback_failures_total.clone()))?;
        metrics
            .registry
            .register(Box::new(metrics.campaign_contacts_sent_total.clone()))?;
        metrics
            .registry
            .register(Box::new(metrics.contacts_ingested_total.clone()))?;
        metrics
            .registry
            .register(Box::new(metrics.reported_errors_total.clone()))?;

        Ok(metrics)
    }

    /// Text exposition of every registered metric
    pub fn encode(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_includes_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.sends_total.with_label_values(&["message_sent"]).inc();
        metrics.rate_limited_total.inc();

        let text = metrics.encode().unwrap();
        assert!(text.contains("outreach_sends_total{outcome=\"message_sent\"} 1"));
        assert!(text.contains("outreach_rate_limited_total 1"));
    }
}
