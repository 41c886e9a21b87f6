//! Single-send path
//!
//! [`SendService`] accepts a request and queues it on the event bus;
//! [`SendDispatcher`] later turns it into a delivered message.

mod dispatcher;
pub mod materialize;
mod request;
mod service;

pub use dispatcher::{DispatchOutcome, DispatcherDeps, SendDispatcher, TENANT_DISABLED_ERROR};
pub use request::{merge_attributes, SendRequest, SETTING_ATTRIBUTE};
pub use service::{Accepted, SendCommand, SendService};
