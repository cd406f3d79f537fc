//! Configuration loading for BatchSQL workers.
//!
//! A worker's configuration is layered from three places, later ones winning:
//! built-in defaults, a TOML file (`batchsql.toml`, `config/batchsql.toml`, or
//! the path in `BATCHSQL_CONFIG`), and environment variables (optionally
//! seeded from a `.env` file). Loading also returns non-fatal guard-rail
//! warnings the caller is expected to log.

/// File, `.env` and environment composition.
pub mod loader;
/// Composed configuration and its raw sources.
pub mod models;
/// Environment parsing helpers.
pub mod util;
pub mod validation;

pub use loader::{ConfigLoad, ConfigLoader, ConfigLoaderOptions, error::ConfigLoadError};
pub use models::{Config, ConfigMetadata, DatabaseConfig, RedisConfig};
pub use validation::{ConfigWarning, ConfigWarnings};
