//! Campaigns - Bulk sends to imported contact lists

mod ingest;
mod progress;
mod runner;

pub use ingest::{ContactIngestQueue, ContactRow, Delivery, IngestError, IngestReceipt};
pub use progress::{Counters, ProgressTracker};
pub use runner::{CampaignRun, CampaignRunner};

use outreach_common::Error;
use thiserror::Error;

/// Campaign lifecycle errors
#[derive(Error, Debug)]
pub enum CampaignError {
    #[error("Campaign not found")]
    NotFound,

    #[error("Campaign has no template")]
    MissingTemplate,

    #[error("Campaign has no send setting")]
    MissingSendSetting,

    #[error("Campaign cannot {action} while {status}")]
    InvalidState { action: &'static str, status: String },

    #[error("Campaign has {count} contacts, tenant limit is {limit}")]
    ContactLimitExceeded { count: i64, limit: i64 },

    #[error("Contact has no value for attribute {0}")]
    MissingAttribute(String),

    #[error(transparent)]
    Storage(#[from] Error),
}

impl CampaignError {
    /// Whether a later attempt may succeed without anyone changing the
    /// campaign
    pub fn is_transient(&self) -> bool {
        matches!(self, CampaignError::Storage(_))
    }

    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            CampaignError::NotFound => 404,
            CampaignError::MissingTemplate
            | CampaignError::MissingSendSetting
            | CampaignError::MissingAttribute(_) => 422,
            CampaignError::InvalidState { .. } | CampaignError::ContactLimitExceeded { .. } => 409,
            CampaignError::Storage(e) => e.status_code(),
        }
    }

    /// Error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CampaignError::NotFound => "CAMPAIGN_NOT_FOUND",
            CampaignError::MissingTemplate => "MISSING_TEMPLATE",
            CampaignError::MissingSendSetting => "MISSING_SEND_SETTING",
            CampaignError::InvalidState { .. } => "INVALID_CAMPAIGN_STATE",
            CampaignError::ContactLimitExceeded { .. } => "CONTACT_LIMIT_EXCEEDED",
            CampaignError::MissingAttribute(_) => "MISSING_ATTRIBUTE",
            CampaignError::Storage(e) => e.code(),
        }
    }
}
