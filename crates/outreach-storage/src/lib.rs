//! Outreach Storage - Database access for send settings, active messages,
//! statuses, campaigns and contacts
//!
//! Every repository is a trait with a PostgreSQL implementation (`Db*`) and an
//! in-memory implementation in [`memory`] used by tests and local runs.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;
