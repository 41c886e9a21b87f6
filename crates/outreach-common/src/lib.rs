//! Outreach Common - Shared types and utilities
//!
//! This crate provides the identifiers, phone-number handling, status codes,
//! configuration and error types shared across all Outreach components.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
