//! Layered configuration loading: file, environment, defaults.

/// Fatal loading errors.
pub mod error;

use std::fs;
use std::path::PathBuf;

use once_cell::sync::Lazy;
use tracing::debug;
use url::Url;

use crate::models::sources::{EnvConfig, FileConfig};
use crate::models::{Config, ConfigMetadata, DatabaseConfig, RedisConfig};
use crate::validation::{self, ConfigWarnings};
use error::ConfigLoadError;

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("batchsql.toml"),
        PathBuf::from("config/batchsql.toml"),
    ]
});

/// Explicit locations overriding the defaults.
#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    /// Configuration file; must exist when given.
    pub config_path: Option<PathBuf>,
    /// `.env` file read instead of the one in the working directory.
    pub env_file: Option<PathBuf>,
}

/// Composes a [`Config`] from defaults, file and environment.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

/// A loaded configuration plus the warnings raised while composing it.
#[derive(Debug)]
pub struct ConfigLoad {
    /// Effective configuration.
    pub config: Config,
    /// Guard-rail findings to log at startup.
    pub warnings: ConfigWarnings,
}

impl ConfigLoader {
    /// Loader using the default locations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loader with explicit locations.
    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    /// Read the configuration file from `path`.
    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    /// Read `.env` values from `path`.
    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    /// Load `.env`, read the process environment, then compose.
    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path)
                .map(|_| true)
                .or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?,
            None => dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                dotenvy::Error::Io(_) => Ok(false),
                _ => Err(err),
            })?,
        };

        let mut load = self.load_with_env(EnvConfig::gather())?;
        load.config.metadata.env_file_loaded = env_file_loaded;
        Ok(load)
    }

    /// Compose from an already gathered environment; the process environment
    /// and `.env` are not consulted.
    pub fn load_with_env(&self, env: EnvConfig) -> Result<ConfigLoad, ConfigLoadError> {
        let (file_config, config_path) = self.load_file_config(&env)?;
        self.compose_config(file_config, env, config_path)
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let (path, explicit) = match (&self.options.config_path, &env.config_path) {
            (Some(path), _) | (None, Some(path)) => (path.clone(), true),
            (None, None) => match DEFAULT_CONFIG_LOCATIONS.iter().find(|p| p.exists()) {
                Some(path) => (path.clone(), false),
                None => return Ok((None, None)),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(ConfigLoadError::MissingConfig { path });
            }
            return Ok((None, None));
        }

        debug!(path = %path.display(), "loading configuration file");
        let contents = fs::read_to_string(&path).map_err(|source| ConfigLoadError::Io {
            path: path.clone(),
            source,
        })?;
        let file_config: FileConfig =
            toml::from_str(&contents).map_err(|source| ConfigLoadError::Parse {
                path: path.clone(),
                source,
            })?;

        Ok((Some(file_config), Some(path)))
    }

    fn compose_config(
        &self,
        file_config: Option<FileConfig>,
        env: EnvConfig,
        config_path: Option<PathBuf>,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();

        if config_path.is_none() {
            warnings.push_with_hint(
                "No batchsql.toml detected; using environment variables and defaults",
                "Create batchsql.toml or point BATCHSQL_CONFIG at a configuration file",
            );
        }
        for (name, raw) in &env.invalid {
            warnings.push(format!("{name}={raw:?} could not be parsed and was ignored"));
        }

        let FileConfig {
            redis: file_redis,
            database: file_database,
            mut scheduler,
        } = file_config.unwrap_or_default();

        let redis_url = env
            .redis_url
            .clone()
            .or(file_redis.map(|r| r.url))
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .ok_or(ConfigLoadError::MissingRedisUrl)?;
        Url::parse(&redis_url).map_err(|source| ConfigLoadError::InvalidRedisUrl { source })?;

        let database_url = env
            .database_url
            .clone()
            .or(file_database.url)
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        if let Some(url) = &database_url {
            Url::parse(url).map_err(|source| ConfigLoadError::InvalidDatabaseUrl { source })?;
        }
        let database_defaults = DatabaseConfig::default();
        let database = DatabaseConfig {
            url: database_url,
            max_connections: file_database
                .max_connections
                .unwrap_or(database_defaults.max_connections),
            connect_timeout_ms: file_database
                .connect_timeout_ms
                .unwrap_or(database_defaults.connect_timeout_ms),
        };

        if let Some(ms) = env.batch_interval_ms {
            scheduler.batch.batch_interval_ms = Some(ms);
        }
        if let Some(max) = env.max_jobs_per_instance {
            scheduler.batch.max_jobs_per_instance = max;
        }
        if let Some(processes) = env.worker_processes {
            scheduler.batch.worker_processes = processes;
        }
        if let Some(endpoint) = env.capacity_endpoint.clone() {
            scheduler.capacity.endpoint_template = endpoint;
        }
        if let Some(enabled) = env.capacity_enabled {
            scheduler.capacity.enabled = enabled;
        }
        if let Some(concurrency) = env.migration_concurrency {
            scheduler.migration.concurrency = concurrency;
        }
        if let Some(ttl) = env.lock_ttl_ms {
            scheduler.migration.lock_ttl_ms = ttl;
        }
        if let Some(heartbeat) = env.lock_heartbeat_ms {
            scheduler.migration.lock_heartbeat_ms = Some(heartbeat);
        }

        let config = Config {
            redis: RedisConfig { url: redis_url },
            database,
            scheduler,
            metadata: ConfigMetadata {
                config_path,
                env_file_loaded: false,
            },
        };

        warnings.extend(validation::apply_guard_rails(&config));
        Ok(ConfigLoad { config, warnings })
    }
}
