//! Outreach Core - Dispatch and campaign orchestration
//!
//! This crate decides how each outbound message is sent (reuse or open a
//! conversation, record the attempt, track delivery signals), enforces
//! per-tenant rate limits and drives campaigns over imported contact lists.

pub mod cache;
pub mod callback;
pub mod campaign;
pub mod conversation;
pub mod dispatch;
pub mod events;
pub mod gateway;
pub mod lock;
pub mod metrics;
pub mod missing;
pub mod rate_limiter;
pub mod services;
pub mod signals;
pub mod status;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cache::{Cache, MemoryCache};
pub use callback::{CallbackNotifier, StatusCallback, SIGNATURE_HEADER};
pub use campaign::{
    CampaignError, CampaignRun, CampaignRunner, ContactIngestQueue, ContactRow, IngestError,
    IngestReceipt, ProgressTracker,
};
pub use conversation::ConversationResolver;
pub use dispatch::{
    Accepted, DispatchOutcome, DispatcherDeps, SendCommand, SendDispatcher, SendRequest,
    SendService,
};
pub use events::{BroadcastEventBus, Event, EventBus, Subscription};
pub use lock::DestinationLock;
pub use metrics::Metrics;
pub use missing::MissingEventTracker;
pub use rate_limiter::RateLimiter;
pub use services::{Backends, Services};
pub use signals::{InboundSignal, SignalIntake};
pub use status::{MessageQuery, StatusStore};
pub use worker::{CampaignScheduler, DispatchWorker};
