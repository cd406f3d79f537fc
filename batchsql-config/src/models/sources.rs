use std::path::PathBuf;

use batchsql_core::SchedulerConfig;
use serde::{Deserialize, Serialize};

use crate::util::{EnvValue, non_empty_var, parse_bool_var, parse_var};

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    /// `[redis]` table.
    pub redis: Option<FileRedisConfig>,
    /// `[database]` table.
    #[serde(default)]
    pub database: FileDatabaseConfig,
    /// `[scheduler]` tables.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// `[redis]` table.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    /// Redis URL.
    pub url: String,
}

/// `[database]` table.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    /// Catalog database URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Catalog pool size.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
    /// Tenant connection timeout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

/// Environment-derived configuration values.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    /// `BATCHSQL_CONFIG`
    pub config_path: Option<PathBuf>,
    /// `REDIS_URL`
    pub redis_url: Option<String>,
    /// `DATABASE_URL`
    pub database_url: Option<String>,
    /// `BATCH_INTERVAL`, in milliseconds
    pub batch_interval_ms: Option<u64>,
    /// `MAX_JOBS_PER_INSTANCE`
    pub max_jobs_per_instance: Option<usize>,
    /// `BATCH_WORKER_PROCESSES`
    pub worker_processes: Option<usize>,
    /// `BATCH_CAPACITY_ENDPOINT`
    pub capacity_endpoint: Option<String>,
    /// `BATCH_CAPACITY_ENABLED`
    pub capacity_enabled: Option<bool>,
    /// `BATCH_MIGRATION_CONCURRENCY`
    pub migration_concurrency: Option<usize>,
    /// `BATCH_LOCK_TTL_MS`
    pub lock_ttl_ms: Option<u64>,
    /// `BATCH_LOCK_HEARTBEAT_MS`
    pub lock_heartbeat_ms: Option<u64>,
    /// Variables that were set but could not be parsed, with their raw value.
    pub invalid: Vec<(&'static str, String)>,
}

impl EnvConfig {
    /// Read every recognised variable from the process environment.
    pub fn gather() -> Self {
        let mut invalid = Vec::new();
        let mut take = |name: &'static str, value: EnvValue<u64>| -> Option<u64> {
            if let EnvValue::Invalid(raw) = &value {
                invalid.push((name, raw.clone()));
            }
            value.parsed()
        };

        let batch_interval_ms = take("BATCH_INTERVAL", parse_var("BATCH_INTERVAL"));
        let max_jobs_per_instance = take("MAX_JOBS_PER_INSTANCE", parse_var("MAX_JOBS_PER_INSTANCE"));
        let worker_processes = take("BATCH_WORKER_PROCESSES", parse_var("BATCH_WORKER_PROCESSES"));
        let migration_concurrency = take(
            "BATCH_MIGRATION_CONCURRENCY",
            parse_var("BATCH_MIGRATION_CONCURRENCY"),
        );
        let lock_ttl_ms = take("BATCH_LOCK_TTL_MS", parse_var("BATCH_LOCK_TTL_MS"));
        let lock_heartbeat_ms = take("BATCH_LOCK_HEARTBEAT_MS", parse_var("BATCH_LOCK_HEARTBEAT_MS"));

        let capacity_enabled = match parse_bool_var("BATCH_CAPACITY_ENABLED") {
            EnvValue::Invalid(raw) => {
                invalid.push(("BATCH_CAPACITY_ENABLED", raw));
                None
            }
            value => value.parsed(),
        };

        Self {
            config_path: non_empty_var("BATCHSQL_CONFIG").map(PathBuf::from),
            redis_url: non_empty_var("REDIS_URL"),
            database_url: non_empty_var("DATABASE_URL"),
            batch_interval_ms,
            max_jobs_per_instance: max_jobs_per_instance.map(|v| v as usize),
            worker_processes: worker_processes.map(|v| v as usize),
            capacity_endpoint: non_empty_var("BATCH_CAPACITY_ENDPOINT"),
            capacity_enabled,
            migration_concurrency: migration_concurrency.map(|v| v as usize),
            lock_ttl_ms,
            lock_heartbeat_ms,
            invalid,
        }
    }
}
