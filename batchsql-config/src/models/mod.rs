/// Raw file and environment inputs.
pub mod sources;

use std::path::PathBuf;

use batchsql_core::SchedulerConfig;

/// Effective worker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared store connection.
    pub redis: RedisConfig,
    /// Catalog database connection.
    pub database: DatabaseConfig,
    /// Scheduling knobs handed to the core.
    pub scheduler: SchedulerConfig,
    /// Provenance of this configuration.
    pub metadata: ConfigMetadata,
}

/// Shared store settings.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Validated `redis://` URL.
    pub url: String,
}

/// Catalog pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Catalog database holding `batch_jobs`. Only commands that touch jobs need it.
    pub url: Option<String>,
    /// Catalog pool size.
    pub max_connections: u32,
    /// Timeout for opening a tenant database connection.
    pub connect_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    /// File that was read, if any.
    pub config_path: Option<PathBuf>,
    /// Whether a `.env` file was applied.
    pub env_file_loaded: bool,
}
