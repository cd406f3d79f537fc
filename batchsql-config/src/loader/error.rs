use std::path::PathBuf;

use thiserror::Error;

/// Reasons a configuration cannot be loaded at all.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    /// An explicitly requested file does not exist.
    #[error("configuration file missing: {path}")]
    MissingConfig {
        /// Requested path.
        path: PathBuf,
    },
    /// The file exists but could not be read.
    #[error("failed to read configuration {path}")]
    Io {
        /// File being loaded.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse configuration {path}")]
    Parse {
        /// File being loaded.
        path: PathBuf,
        /// Underlying failure.
        #[source]
        source: toml::de::Error,
    },
    /// No Redis URL in the file or environment.
    #[error("Redis URL not configured; set REDIS_URL or [redis].url")]
    MissingRedisUrl,
    /// The Redis URL does not parse.
    #[error("invalid Redis URL")]
    InvalidRedisUrl {
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },
    /// The catalog database URL does not parse.
    #[error("invalid database URL")]
    InvalidDatabaseUrl {
        /// Parser failure.
        #[source]
        source: url::ParseError,
    },
    /// The `.env` file could not be read.
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
