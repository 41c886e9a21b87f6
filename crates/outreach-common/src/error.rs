//! Error types for Outreach

use thiserror::Error;

/// Main error type for Outreach
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Send setting is disabled: {0}")]
    SettingDisabled(String),

    #[error("Tenant is disabled: {0}")]
    TenantDisabled(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Destination is busy: {0}")]
    LockUnavailable(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Event bus error: {0}")]
    EventBus(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for Outreach
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Config(_) => 500,
            Error::Database(_) => 500,
            Error::Cache(_) => 500,
            Error::Validation(_) => 422,
            Error::NotFound(_) => 404,
            Error::SettingDisabled(_) => 403,
            Error::TenantDisabled(_) => 403,
            Error::RateLimitExceeded => 429,
            Error::LockUnavailable(_) => 409,
            Error::Delivery(_) => 502,
            Error::EventBus(_) => 500,
            Error::Internal(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Returns the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG_ERROR",
            Error::Database(_) => "DATABASE_ERROR",
            Error::Cache(_) => "CACHE_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::SettingDisabled(_) => "SETTING_DISABLED",
            Error::TenantDisabled(_) => "TENANT_DISABLED",
            Error::RateLimitExceeded => "RATE_LIMITED",
            Error::LockUnavailable(_) => "DESTINATION_BUSY",
            Error::Delivery(_) => "DELIVERY_ERROR",
            Error::EventBus(_) => "EVENT_BUS_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
            Error::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the error is a synchronous rejection of the caller's request
    /// (as opposed to an infrastructure failure).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::Validation(_)
                | Error::NotFound(_)
                | Error::SettingDisabled(_)
                | Error::TenantDisabled(_)
                | Error::RateLimitExceeded
        )
    }
}
