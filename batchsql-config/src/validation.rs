//! Non-fatal guard rails over a composed [`Config`].

use crate::models::Config;

/// A non-fatal configuration finding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    /// What looks wrong.
    pub message: String,
    /// How to fix it.
    pub hint: Option<String>,
}

/// Ordered list of findings.
#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings {
    /// Findings in the order they were raised.
    pub items: Vec<ConfigWarning>,
}

impl ConfigWarnings {
    /// Record a finding without a hint.
    pub fn push<S: Into<String>>(&mut self, message: S) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: None,
        });
    }

    /// Record a finding with a remedy.
    pub fn push_with_hint<S: Into<String>, H: Into<String>>(&mut self, message: S, hint: H) {
        self.items.push(ConfigWarning {
            message: message.into(),
            hint: Some(hint.into()),
        });
    }

    /// Whether nothing was flagged.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append another set of findings.
    pub fn extend(&mut self, other: ConfigWarnings) {
        self.items.extend(other.items);
    }

    /// Whether any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.items.iter().any(|w| w.message.contains(needle))
    }
}

/// Flag settings that load fine but are likely mistakes.
pub fn apply_guard_rails(config: &Config) -> ConfigWarnings {
    let mut warnings = ConfigWarnings::default();
    let scheduler = &config.scheduler;

    if scheduler.batch.worker_processes <= 1 {
        warnings.push_with_hint(
            "BATCH_WORKER_PROCESSES is 1; admission limits assume this is the only worker process",
            "Set BATCH_WORKER_PROCESSES to the number of workers sharing the database hosts",
        );
    }

    if scheduler.capacity.enabled && !scheduler.capacity.endpoint_template.contains("{host}") {
        warnings.push_with_hint(
            "Capacity probing is enabled but BATCH_CAPACITY_ENDPOINT has no {host} placeholder",
            "Every host would be probed at the same URL; include {host} in the endpoint",
        );
    }

    if let Some(heartbeat) = scheduler.migration.lock_heartbeat()
        && heartbeat >= scheduler.migration.lock_ttl()
    {
        warnings.push_with_hint(
            "BATCH_LOCK_HEARTBEAT_MS is not shorter than BATCH_LOCK_TTL_MS",
            "Migration locks will expire between renewals; use a heartbeat well below the TTL",
        );
    }

    if config.database.url.is_none() {
        warnings.push_with_hint(
            "DATABASE_URL not configured; job dispatch and migration are unavailable",
            "Set DATABASE_URL or [database].url to the catalog holding batch_jobs",
        );
    }

    warnings
}
