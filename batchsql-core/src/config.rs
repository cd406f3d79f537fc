use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Launcher tick used when `batch_interval_ms` is not configured.
pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Knobs for the batch scheduler.
///
/// All fields carry defaults so a deployment only has to spell out what it
/// changes.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Launcher cadence and admission ceilings.
    pub batch: BatchConfig,
    /// Per-host capacity probing.
    pub capacity: CapacityConfig,
    /// Legacy queue migration tuning.
    pub migration: MigrationConfig,
    /// Shared-store key layout.
    pub keys: KeyspaceConfig,
}

/// Dispatch cadence and admission ceilings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Launcher tick in milliseconds. Falls back to [`DEFAULT_BATCH_INTERVAL`].
    pub batch_interval_ms: Option<u64>,
    /// Static per-host ceiling used when capacity probing is off or a host
    /// has not been probed yet.
    pub max_jobs_per_instance: usize,
    /// Number of worker processes sharing the hosts.
    ///
    /// Admission is counted per process, so the cluster-wide concurrency on a
    /// host is `limit x worker_processes`. Probed capacity is divided by this
    /// value to keep the cluster total near the host's real capacity.
    pub worker_processes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_interval_ms: None,
            max_jobs_per_instance: 2,
            worker_processes: 1,
        }
    }
}

impl BatchConfig {
    /// Launcher tick; zero or unset falls back to the default.
    pub fn batch_interval(&self) -> Duration {
        self.batch_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_BATCH_INTERVAL)
    }

    /// Per-process admission limit derived from a probed core count.
    pub fn per_process_limit(&self, available_cores: u32) -> usize {
        let processes = self.worker_processes.max(1);
        (available_cores as usize / processes).max(1)
    }
}

/// Per-host capacity endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Probe hosts and derive limits from their core counts.
    pub enabled: bool,
    /// Endpoint URL; `{host}` is replaced with the database host.
    pub endpoint_template: String,
    /// Hard timeout for one probe request.
    pub timeout_ms: u64,
    /// How often known hosts are re-probed.
    pub refresh_interval_ms: u64,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint_template: "http://{host}:9999/load".to_string(),
            timeout_ms: 2_000,
            refresh_interval_ms: 30_000,
        }
    }
}

impl CapacityConfig {
    /// Probe request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Refresh cadence, at least one millisecond.
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.max(1))
    }

    /// Endpoint URL for `host`.
    pub fn endpoint_for(&self, host: &str) -> String {
        self.endpoint_template.replace("{host}", host)
    }
}

/// Legacy queue migration tuning.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Hosts drained in parallel.
    pub concurrency: usize,
    /// Expiry of the per-host lock, recovering from a crashed holder.
    pub lock_ttl_ms: u64,
    /// When set, the lock is renewed on this cadence while draining.
    pub lock_heartbeat_ms: Option<u64>,
    /// When set, `run` repeats migration passes on this cadence.
    pub interval_ms: Option<u64>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            lock_ttl_ms: 60_000,
            lock_heartbeat_ms: None,
            interval_ms: None,
        }
    }
}

impl MigrationConfig {
    /// Per-host lock expiry.
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_ttl_ms.max(1))
    }

    /// Renewal cadence, if the heartbeat is enabled.
    pub fn lock_heartbeat(&self) -> Option<Duration> {
        self.lock_heartbeat_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Cadence of periodic passes, if enabled.
    pub fn interval(&self) -> Option<Duration> {
        self.interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }
}

/// Key prefixes in the shared store. Both queue generations must use
/// distinct prefixes so host discovery never matches a user queue.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyspaceConfig {
    /// User-Database Queue key.
    pub user_database_queue: String,
    /// Prefix of the legacy host-keyed job queues.
    pub legacy_queue_prefix: String,
    /// Prefix of the current user-keyed job queues.
    pub user_queue_prefix: String,
    /// Prefix of the per-host migration locks.
    pub lock_prefix: String,
    /// Prefix of the per-user metadata hashes.
    pub metadata_prefix: String,
}

impl Default for KeyspaceConfig {
    fn default() -> Self {
        Self {
            user_database_queue: "batch:users".to_string(),
            legacy_queue_prefix: "batch:queues:".to_string(),
            user_queue_prefix: "batch:queue:".to_string(),
            lock_prefix: "batch:locks:".to_string(),
            metadata_prefix: "rails:users:".to_string(),
        }
    }
}

impl KeyspaceConfig {
    /// Legacy queue key for `host`.
    pub fn legacy_queue(&self, host: &str) -> String {
        format!("{}{host}", self.legacy_queue_prefix)
    }

    /// Glob matching every legacy queue key.
    pub fn legacy_queue_pattern(&self) -> String {
        format!("{}*", self.legacy_queue_prefix)
    }

    /// Host part of a legacy queue key, if the key belongs to that generation.
    pub fn host_from_legacy_key<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.legacy_queue_prefix.as_str())
            .filter(|host| !host.is_empty())
    }

    /// Current-generation job queue key for `user`.
    pub fn user_queue(&self, user: &str) -> String {
        format!("{}{user}", self.user_queue_prefix)
    }

    /// Lock key for `resource`.
    pub fn lock(&self, resource: &str) -> String {
        format!("{}{resource}", self.lock_prefix)
    }

    /// Metadata hash key for `user`.
    pub fn metadata(&self, user: &str) -> String {
        format!("{}{user}", self.metadata_prefix)
    }
}
