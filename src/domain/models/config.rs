use serde::{Deserialize, Serialize};

/// Main configuration structure for the drover coordinator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// HTTP server binding
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Background scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// External ledger settlement
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Content-addressed artifact store
    #[serde(default)]
    pub storage: StorageConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base path the API is mounted under.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_endpoint() -> String {
    "/api".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            endpoint: default_endpoint(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Connection string, e.g. `sqlite:.drover/drover.db`
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_url() -> String {
    "sqlite:.drover/drover.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

/// Background scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SchedulerConfig {
    /// Heartbeat timeout in minutes. A runner silent for longer than this is
    /// swept offline.
    #[serde(default = "default_heartbeat_timeout_minutes")]
    pub interval: u64,
}

const fn default_heartbeat_timeout_minutes() -> u64 {
    5
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: default_heartbeat_timeout_minutes(),
        }
    }
}

/// External ledger settlement configuration.
///
/// An empty `rpc` disables settlement; rewards are still persisted locally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LedgerConfig {
    #[serde(default)]
    pub rpc: String,

    #[serde(default)]
    pub chain_id: u64,

    #[serde(default)]
    pub token_address: String,

    #[serde(default)]
    pub stake_address: String,
}

/// Content-addressed artifact store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct StorageConfig {
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub gateway_url: String,

    #[serde(default)]
    pub create_deals: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional directory for rotated file output; empty logs to stderr only.
    #[serde(default)]
    pub directory: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            directory: String::new(),
        }
    }
}
