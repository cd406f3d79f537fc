//! Per-host admission control for dispatched jobs.
//!
//! The tally is process-local. With several worker processes the real
//! concurrency on a host is the sum over processes, so limits are derived with
//! [`BatchConfig::per_process_limit`](crate::config::BatchConfig::per_process_limit)
//! to keep that sum near the host's capacity.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace};

#[derive(Debug, Default)]
struct HostState {
    inflight: usize,
    /// Probed limit. `None` falls back to the static default.
    limit: Option<usize>,
}

#[derive(Debug, Default)]
struct AdmissionState {
    hosts: HashMap<String, HostState>,
}

/// Snapshot of one host's admission state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HostUtilization {
    /// Jobs currently admitted on the host by this process.
    pub inflight: usize,
    /// Ceiling in force: the probed limit, or the static default.
    pub limit: usize,
}

/// Process-local in-flight counter per database host.
///
/// Clones share the same tally.
#[derive(Clone)]
pub struct HostAdmission {
    default_limit: usize,
    state: Arc<Mutex<AdmissionState>>,
}

impl fmt::Debug for HostAdmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("HostAdmission");
        debug.field("default_limit", &self.default_limit);

        match self.state.try_lock() {
            Ok(state) => {
                debug.field("host_count", &state.hosts.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }

        debug.finish()
    }
}

impl HostAdmission {
    /// `default_limit` is `max_jobs_per_instance`; it is floored at one so a
    /// misconfiguration cannot stall every host.
    pub fn new(default_limit: usize) -> Self {
        Self {
            default_limit: default_limit.max(1),
            state: Arc::new(Mutex::new(AdmissionState::default())),
        }
    }

    fn limit_of(&self, host: &HostState) -> usize {
        host.limit.unwrap_or(self.default_limit)
    }

    /// Take a slot on `host` if one is free. On `false` the caller must not
    /// dispatch and must hand the candidate back to its queue.
    pub async fn try_admit(&self, host: &str) -> bool {
        let mut state = self.state.lock().await;
        let entry = state.hosts.entry(host.to_string()).or_default();
        let limit = entry.limit.unwrap_or(self.default_limit);

        if entry.inflight < limit {
            entry.inflight += 1;
            trace!(host = %host, inflight = entry.inflight, limit, "admitted");
            true
        } else {
            debug!(host = %host, inflight = entry.inflight, limit, "host saturated");
            false
        }
    }

    /// Give a slot back. Releasing an idle host is a no-op.
    pub async fn release(&self, host: &str) {
        let mut state = self.state.lock().await;
        if let Some(entry) = state.hosts.get_mut(host) {
            entry.inflight = entry.inflight.saturating_sub(1);
            trace!(host = %host, inflight = entry.inflight, "released");
        }
    }

    /// Install a probed limit for `host`. Slots already held above a lowered
    /// limit drain naturally; no new ones are granted until below it.
    pub async fn set_limit(&self, host: &str, limit: usize) {
        let mut state = self.state.lock().await;
        let entry = state.hosts.entry(host.to_string()).or_default();
        entry.limit = Some(limit.max(1));
    }

    /// In-flight count and limit for `host`; unseen hosts report zero in flight.
    pub async fn utilization(&self, host: &str) -> HostUtilization {
        let state = self.state.lock().await;
        match state.hosts.get(host) {
            Some(entry) => HostUtilization {
                inflight: entry.inflight,
                limit: self.limit_of(entry),
            },
            None => HostUtilization {
                inflight: 0,
                limit: self.default_limit,
            },
        }
    }

    /// Hosts this process has tried to admit work for or has limits for.
    pub async fn known_hosts(&self) -> Vec<String> {
        let state = self.state.lock().await;
        let mut hosts: Vec<String> = state.hosts.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    /// Utilization of every host seen so far.
    pub async fn snapshot(&self) -> HashMap<String, HostUtilization> {
        let state = self.state.lock().await;
        state
            .hosts
            .iter()
            .map(|(host, entry)| {
                (
                    host.clone(),
                    HostUtilization {
                        inflight: entry.inflight,
                        limit: self.limit_of(entry),
                    },
                )
            })
            .collect()
    }
}
