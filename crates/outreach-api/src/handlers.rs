//! API request handlers

pub mod campaigns;
pub mod conversations;
pub mod health;
pub mod messages;
pub mod metrics;
pub mod send;
pub mod signals;

pub use health::*;
