//! Per-campaign ingest progress counters

use outreach_common::types::CampaignId;
use outreach_storage::models::CampaignProgress;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Counter pair for one campaign
#[derive(Debug, Default)]
pub struct Counters {
    processing_total: AtomicI64,
    processed_total: AtomicI64,
}

impl Counters {
    fn seeded(progress: CampaignProgress) -> Self {
        Self {
            processing_total: AtomicI64::new(progress.processing_total),
            processed_total: AtomicI64::new(progress.processed_total),
        }
    }

    pub fn add_processing(&self, n: i64) -> i64 {
        self.processing_total.fetch_add(n, Ordering::SeqCst) + n
    }

    pub fn add_processed(&self, n: i64) -> i64 {
        self.processed_total.fetch_add(n, Ordering::SeqCst) + n
    }

    pub fn snapshot(&self, finished: bool) -> CampaignProgress {
        CampaignProgress {
            processing_total: self.processing_total.load(Ordering::SeqCst),
            processed_total: self.processed_total.load(Ordering::SeqCst),
            finished,
        }
    }
}

/// Counters keyed by campaign, created on first use
#[derive(Debug, Default)]
pub struct ProgressTracker {
    counters: Mutex<HashMap<CampaignId, Arc<Counters>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for the campaign, starting from `seed` when first seen
    pub fn counters(&self, campaign_id: CampaignId, seed: CampaignProgress) -> Arc<Counters> {
        let mut counters = self
            .counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counters
            .entry(campaign_id)
            .or_insert_with(|| Arc::new(Counters::seeded(seed)))
            .clone()
    }

    pub fn get(&self, campaign_id: CampaignId) -> Option<Arc<Counters>> {
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&campaign_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    #[test]
    fn test_seed_applies_once() {
        let tracker = ProgressTracker::new();
        let id = Uuid::new_v4();
        let seed = CampaignProgress {
            processing_total: 10,
            processed_total: 4,
            finished: false,
        };

        let counters = tracker.counters(id, seed);
        counters.add_processing(2);
        counters.add_processed(1);

        let again = tracker.counters(id, CampaignProgress::default());
        assert_eq!(
            again.snapshot(true),
            CampaignProgress {
                processing_total: 12,
                processed_total: 5,
                finished: true
            }
        );
        assert!(tracker.get(Uuid::new_v4()).is_none());
    }
}
