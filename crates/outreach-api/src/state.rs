//! Shared handler state

use outreach_core::Services;
use outreach_storage::DatabasePool;
use std::sync::Arc;

/// Application state shared by every handler
pub struct AppState {
    pub services: Arc<Services>,
    /// Checked by the readiness check; absent when running on in-memory
    /// storage
    pub db_pool: Option<DatabasePool>,
}

impl AppState {
    pub fn new(services: Arc<Services>, db_pool: Option<DatabasePool>) -> Self {
        Self { services, db_pool }
    }
}
