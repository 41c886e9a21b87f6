//! Configuration for Outreach

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Per-tenant send rate limit
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Single-send dispatch
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Campaign runner and contact ingestion
    #[serde(default)]
    pub campaign: CampaignConfig,

    /// Tenant status callbacks
    #[serde(default)]
    pub callback: CallbackConfig,

    /// Statically configured channels and tenant policies
    #[serde(default)]
    pub gateway: GatewayConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Bind address
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            bind_address: default_bind_address(),
        }
    }
}

fn default_hostname() -> String {
    "localhost".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database backend: only "postgres" is supported
    #[serde(default = "default_db_backend")]
    pub backend: String,

    /// Database URL
    pub url: Option<String>,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: default_db_backend(),
            url: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
        }
    }
}

fn default_db_backend() -> String {
    "postgres".to_string()
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// API port
    #[serde(default = "default_api_port")]
    pub port: u16,

    /// CORS allowed origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_api_port(),
            cors_origins: Vec::new(),
        }
    }
}

fn default_api_port() -> u16 {
    8080
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Maximum accepted sends per tenant per window
    #[serde(default = "default_rate_limit_max")]
    pub max_per_window: u64,

    /// Window length in seconds
    #[serde(default = "default_rate_limit_window")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_per_window: default_rate_limit_max(),
            window_secs: default_rate_limit_window(),
        }
    }
}

fn default_rate_limit_max() -> u64 {
    1000
}

fn default_rate_limit_window() -> u64 {
    60
}

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Member id used for the platform's own member in new conversations
    #[serde(default = "default_system_member")]
    pub system_member_id: String,

    /// TTL of missing received/answered/read markers in seconds
    #[serde(default = "default_missing_marker_ttl")]
    pub missing_marker_ttl_secs: u64,

    /// TTL of the per-destination lease in seconds
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// How long a send waits for a busy destination before failing
    #[serde(default = "default_lock_wait")]
    pub lock_wait_ms: u64,

    /// How long a caller-supplied external id stays reserved while its
    /// send is queued, in seconds
    #[serde(default = "default_external_id_ttl")]
    pub external_id_ttl_secs: u64,

    /// Action code to `created_by_channel` tag
    #[serde(default = "default_action_channels")]
    pub action_channels: HashMap<String, String>,

    /// Tag applied to every campaign send
    #[serde(default = "default_campaign_channel")]
    pub campaign_channel: String,

    /// Channel tags whose conversations must not raise a realtime event
    #[serde(default = "default_omit_event_channels")]
    pub omit_event_channels: Vec<String>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            system_member_id: default_system_member(),
            missing_marker_ttl_secs: default_missing_marker_ttl(),
            lock_ttl_secs: default_lock_ttl(),
            lock_wait_ms: default_lock_wait(),
            external_id_ttl_secs: default_external_id_ttl(),
            action_channels: default_action_channels(),
            campaign_channel: default_campaign_channel(),
            omit_event_channels: default_omit_event_channels(),
        }
    }
}

fn default_system_member() -> String {
    "system".to_string()
}

fn default_missing_marker_ttl() -> u64 {
    2 * 24 * 60 * 60
}

fn default_lock_ttl() -> u64 {
    30
}

fn default_lock_wait() -> u64 {
    2000
}

fn default_external_id_ttl() -> u64 {
    86400
}

fn default_action_channels() -> HashMap<String, String> {
    [
        ("confirmation", "confirmation"),
        ("reminder", "reminder"),
        ("nps", "nps"),
        ("rescheduling", "rescheduling"),
    ]
    .into_iter()
    .map(|(action, channel)| (action.to_string(), channel.to_string()))
    .collect()
}

fn default_campaign_channel() -> String {
    "campaign".to_string()
}

fn default_omit_event_channels() -> Vec<String> {
    vec![
        "confirmation".to_string(),
        "reminder".to_string(),
        "campaign".to_string(),
    ]
}

/// Campaign configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignConfig {
    /// Interval between scheduler ticks in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Maximum pending contacts per campaign in the ingest queue
    #[serde(default = "default_ingest_capacity")]
    pub ingest_queue_capacity: usize,

    /// Contacts drained between progress writes
    #[serde(default = "default_ingest_batch")]
    pub ingest_batch_size: usize,

    /// TTL of the pause flag in seconds
    #[serde(default = "default_pause_flag_ttl")]
    pub pause_flag_ttl_secs: u64,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            ingest_queue_capacity: default_ingest_capacity(),
            ingest_batch_size: default_ingest_batch(),
            pause_flag_ttl_secs: default_pause_flag_ttl(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}

fn default_ingest_capacity() -> usize {
    50_000
}

fn default_ingest_batch() -> usize {
    100
}

fn default_pause_flag_ttl() -> u64 {
    24 * 60 * 60
}

/// Status callback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Request timeout in milliseconds
    #[serde(default = "default_callback_timeout")]
    pub timeout_ms: u64,

    /// Allow callback URLs on private networks (development only)
    #[serde(default)]
    pub allow_private_targets: bool,
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_callback_timeout(),
            allow_private_targets: false,
        }
    }
}

fn default_callback_timeout() -> u64 {
    5000
}

/// Channels and tenant policies served from configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Channel token used when a lookup names no channel
    #[serde(default)]
    pub validator_channel: Option<String>,

    /// Channels keyed by channel token
    #[serde(default)]
    pub channels: HashMap<String, ChannelSettings>,

    /// Tenants whose sends are refused
    #[serde(default)]
    pub disabled_tenants: Vec<uuid::Uuid>,

    /// Tenants with conversation rating enabled
    #[serde(default)]
    pub rating_tenants: Vec<uuid::Uuid>,

    /// Contacts allowed per campaign; unlimited when unset
    #[serde(default)]
    pub campaign_contact_limit: Option<i64>,
}

/// One statically configured channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub workspace_id: String,
    pub channel_id: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub session_window_hours: Option<i64>,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from the first file found, overridden by
    /// `OUTREACH__SECTION__KEY` environment variables
    pub fn load() -> crate::Result<Self> {
        Self::load_from(&[
            PathBuf::from("./config.toml"),
            PathBuf::from("/etc/outreach/config.toml"),
        ])
    }

    /// [`Config::load`] over an explicit list of candidate files
    pub fn load_from(paths: &[PathBuf]) -> crate::Result<Self> {
        let mut builder = config::Config::builder();
        match paths.iter().find(|p| p.exists()) {
            Some(path) => {
                info!("Loading configuration from {}", path.display());
                builder = builder.add_source(config::File::from(path.as_path()));
            }
            None => warn!("No configuration file found, using environment only"),
        }

        builder
            .add_source(
                config::Environment::with_prefix("OUTREACH")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::Config(format!("Failed to load configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_first_existing_file() {
        let dir = std::env::temp_dir().join(format!("outreach-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("config.toml");
        std::fs::write(
            &file,
            "[database]\nurl = \"postgres://localhost/outreach\"\n\n[rate_limit]\nmax_per_window = 5\n",
        )
        .unwrap();

        let config = Config::load_from(&[dir.join("missing.toml"), file]).unwrap();
        assert_eq!(config.rate_limit.max_per_window, 5);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/outreach"));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_default_sections() {
        let rate = RateLimitConfig::default();
        assert_eq!(rate.max_per_window, 1000);
        assert_eq!(rate.window_secs, 60);

        let dispatch = DispatchConfig::default();
        assert_eq!(dispatch.missing_marker_ttl_secs, 172_800);
        assert_eq!(
            dispatch.action_channels.get("confirmation").map(String::as_str),
            Some("confirmation")
        );
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[database]
url = "postgres://localhost/outreach"

[rate_limit]
max_per_window = 50

[dispatch]
campaign_channel = "bulk"

[dispatch.action_channels]
confirmation = "confirm"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.backend, "postgres");
        assert_eq!(config.rate_limit.max_per_window, 50);
        assert_eq!(config.rate_limit.window_secs, 60);
        assert_eq!(config.dispatch.campaign_channel, "bulk");
        assert_eq!(config.dispatch.action_channels.len(), 1);
        assert_eq!(config.api.port, 8080);
        assert!(config.gateway.channels.is_empty());
    }

    #[test]
    fn test_parse_gateway_channels() {
        let toml = r#"
[database]
url = "postgres://localhost/outreach"

[gateway]
validator_channel = "main"
campaign_contact_limit = 200

[gateway.channels.main]
workspace_id = "ws-1"
channel_id = "chan-1"
session_window_hours = 24
"#;

        let config: Config = toml::from_str(toml).unwrap();
        let main = &config.gateway.channels["main"];
        assert!(main.enabled);
        assert_eq!(main.session_window_hours, Some(24));
        assert_eq!(config.gateway.campaign_contact_limit, Some(200));
    }
}
