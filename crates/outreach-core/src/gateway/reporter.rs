//! Error telemetry sink

use crate::metrics::Metrics;
use std::sync::{Arc, Mutex};
use tracing::{error, warn};

/// Receives degraded-path errors and operational alerts
pub trait ErrorReporter: Send + Sync {
    /// A failure that was absorbed without aborting the operation
    fn report(&self, context: &str, error: &str);

    /// A condition an operator should look at
    fn alert(&self, message: &str);
}

/// Reporter that logs and counts
pub struct TracingErrorReporter {
    metrics: Arc<Metrics>,
}

impl TracingErrorReporter {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { metrics }
    }
}

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, context: &str, error: &str) {
        error!(context, error, "Reported error");
        self.metrics
            .reported_errors_total
            .with_label_values(&[context])
            .inc();
    }

    fn alert(&self, message: &str) {
        warn!(alert = message, "Operational alert");
        self.metrics.alerts_total.inc();
    }
}

/// Reporter that keeps everything it receives
#[derive(Default)]
pub struct MemoryErrorReporter {
    reports: Mutex<Vec<(String, String)>>,
    alerts: Mutex<Vec<String>>,
}

impl MemoryErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(String, String)> {
        self.reports.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn alerts(&self) -> Vec<String> {
        self.alerts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

impl ErrorReporter for MemoryErrorReporter {
    fn report(&self, context: &str, error: &str) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((context.to_string(), error.to_string()));
        }
    }

    fn alert(&self, message: &str) {
        if let Ok(mut alerts) = self.alerts.lock() {
            alerts.push(message.to_string());
        }
    }
}
