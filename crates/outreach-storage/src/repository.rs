//! Repository layer for data access

pub mod active_messages;
pub mod campaigns;
pub mod contacts;
pub mod send_settings;
pub mod statuses;

use outreach_common::Error;

// Re-export concrete repository implementations with simple names
pub use active_messages::DbActiveMessageRepository;
pub use campaigns::DbCampaignRepository;
pub use contacts::DbContactRepository;
pub use send_settings::DbSendSettingRepository;
pub use statuses::DbStatusRepository;

// Re-export repository traits
pub use active_messages::ActiveMessageRepository;
pub use campaigns::CampaignRepository;
pub use contacts::ContactRepository;
pub use send_settings::SendSettingRepository;
pub use statuses::StatusRepository;

pub(crate) fn db_error(e: sqlx::Error) -> Error {
    Error::Database(e.to_string())
}
