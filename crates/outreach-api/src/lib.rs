//! Outreach API - REST API server
//!
//! HTTP boundary for single sends, message listings, conversation lookups
//! and campaign management, plus health checks and metrics.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ErrorResponse;
pub use routes::create_router;
pub use state::AppState;
