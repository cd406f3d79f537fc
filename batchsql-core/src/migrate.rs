//! Moves job ids from the legacy host-keyed queues into per-user queues.
//!
//! Each host is drained under its distributed lock, so at most one migrator
//! in the cluster moves entries for a host at a time. Hosts whose lock is held
//! elsewhere are skipped; repeated runs converge.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{KeyspaceConfig, MigrationConfig};
use crate::error::Result;
use crate::jobs::JobOwnerLookup;
use crate::lock::{HostLocks, LockGuard, LockOutcome};
use crate::model::JobId;
use crate::queue::{UserDatabaseQueue, UserJobQueue};
use crate::store::{SharedStore, scan_all};

const SCAN_PAGE_SIZE: usize = 100;

/// How one host's migration ended.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum HostOutcome {
    /// Legacy queue emptied while holding the lock.
    Drained {
        /// Job ids moved into user queues.
        moved: usize,
        /// Entries dropped because their owner could not be resolved.
        dropped: usize,
    },
    /// Lock held by another migrator; host skipped this round.
    Contended,
    /// Lock lost mid-drain; stopped after the entry in hand.
    Interrupted {
        /// Job ids moved into user queues.
        moved: usize,
        /// Entries dropped because their owner could not be resolved.
        dropped: usize,
    },
    /// Store error; entries not yet popped stay on the legacy queue.
    Failed {
        /// Error that stopped the drain.
        reason: String,
    },
}

/// Outcome for a single host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HostMigration {
    /// Database host whose legacy queue was visited.
    pub host: String,
    /// What happened to it.
    #[serde(flatten)]
    pub outcome: HostOutcome,
}

/// Summary of one migration pass, sorted by host.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// One entry per discovered host.
    pub hosts: Vec<HostMigration>,
}

impl MigrationReport {
    /// Hosts found by discovery.
    pub fn hosts_discovered(&self) -> usize {
        self.hosts.len()
    }

    /// Job ids moved into user queues.
    pub fn moved(&self) -> usize {
        self.hosts
            .iter()
            .map(|h| match h.outcome {
                HostOutcome::Drained { moved, .. } | HostOutcome::Interrupted { moved, .. } => {
                    moved
                }
                _ => 0,
            })
            .sum()
    }

    /// Entries dropped because their owner could not be resolved.
    pub fn dropped(&self) -> usize {
        self.hosts
            .iter()
            .map(|h| match h.outcome {
                HostOutcome::Drained { dropped, .. }
                | HostOutcome::Interrupted { dropped, .. } => dropped,
                _ => 0,
            })
            .sum()
    }

    /// Hosts skipped because another migrator held the lock.
    pub fn contended(&self) -> usize {
        self.count(|o| matches!(o, HostOutcome::Contended))
    }

    /// Hosts that stopped on a store error.
    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, HostOutcome::Failed { .. }))
    }

    /// Outcome for `host`, if it was discovered.
    pub fn outcome(&self, host: &str) -> Option<&HostOutcome> {
        self.hosts
            .iter()
            .find(|h| h.host == host)
            .map(|h| &h.outcome)
    }

    fn count(&self, pred: impl Fn(&HostOutcome) -> bool) -> usize {
        self.hosts.iter().filter(|h| pred(&h.outcome)).count()
    }
}

/// Drains legacy host queues under per-host locks.
#[derive(Clone)]
pub struct QueueMigrator {
    store: Arc<dyn SharedStore>,
    keys: KeyspaceConfig,
    locks: HostLocks,
    owners: Arc<dyn JobOwnerLookup>,
    user_jobs: UserJobQueue,
    user_databases: UserDatabaseQueue,
    concurrency: usize,
    heartbeat: Option<Duration>,
}

impl fmt::Debug for QueueMigrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueMigrator")
            .field("legacy_prefix", &self.keys.legacy_queue_prefix)
            .field("locks", &self.locks)
            .field("concurrency", &self.concurrency)
            .field("heartbeat", &self.heartbeat)
            .finish()
    }
}

impl QueueMigrator {
    /// Migrator over `store` resolving job owners through `owners`.
    pub fn new(
        store: Arc<dyn SharedStore>,
        keys: KeyspaceConfig,
        owners: Arc<dyn JobOwnerLookup>,
        config: &MigrationConfig,
    ) -> Self {
        Self {
            locks: HostLocks::new(Arc::clone(&store), keys.clone(), config.lock_ttl()),
            user_jobs: UserJobQueue::new(Arc::clone(&store), keys.clone()),
            user_databases: UserDatabaseQueue::new(Arc::clone(&store), &keys),
            store,
            keys,
            owners,
            concurrency: config.concurrency.max(1),
            heartbeat: config.lock_heartbeat(),
        }
    }

    /// Locks guarding each host's drain.
    pub fn locks(&self) -> &HostLocks {
        &self.locks
    }

    /// Hosts that currently have a legacy queue, sorted.
    pub async fn discover_hosts(&self) -> Result<Vec<String>> {
        let pattern = self.keys.legacy_queue_pattern();
        let keys = scan_all(self.store.as_ref(), &pattern, SCAN_PAGE_SIZE).await?;
        let mut hosts: Vec<String> = keys
            .iter()
            .filter_map(|key| self.keys.host_from_legacy_key(key))
            .filter(|host| !host.is_empty())
            .map(str::to_string)
            .collect();
        hosts.sort();
        hosts.dedup();
        Ok(hosts)
    }

    /// One full pass: discover, then migrate up to `concurrency` hosts at once.
    ///
    /// Only a failed discovery is an error; per-host problems are reported in
    /// the returned [`MigrationReport`].
    pub async fn run(&self) -> Result<MigrationReport> {
        let hosts = self.discover_hosts().await?;
        if hosts.is_empty() {
            debug!("no legacy queues found");
            return Ok(MigrationReport::default());
        }
        info!(hosts = hosts.len(), "migrating legacy queues");

        let mut results: Vec<HostMigration> = futures::stream::iter(hosts)
            .map(|host| async move {
                let outcome = self.migrate_host(&host).await;
                HostMigration { host, outcome }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by(|a, b| a.host.cmp(&b.host));

        let report = MigrationReport { hosts: results };
        info!(
            hosts = report.hosts_discovered(),
            moved = report.moved(),
            dropped = report.dropped(),
            contended = report.contended(),
            failed = report.failed(),
            "legacy queue migration pass finished"
        );
        Ok(report)
    }

    /// Lock, drain and unlock one host. The lock is released on every exit path.
    pub async fn migrate_host(&self, host: &str) -> HostOutcome {
        let guard = match self.locks.acquire(host).await {
            Ok(LockOutcome::Acquired(guard)) => guard,
            Ok(LockOutcome::Contended) => {
                info!(host = %host, "legacy queue locked by another migrator; skipping");
                return HostOutcome::Contended;
            }
            Err(err) => {
                error!(host = %host, error = %err, "failed to acquire migration lock");
                return HostOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        };

        let lost = CancellationToken::new();
        let heartbeat = self
            .heartbeat
            .map(|every| spawn_heartbeat(self.locks.clone(), guard.clone(), every, lost.clone()));

        let outcome = self.drain(host, &lost).await;

        if let Some(handle) = heartbeat {
            handle.abort();
        }
        if let Err(err) = self.locks.release(guard).await {
            warn!(host = %host, error = %err, "failed to release migration lock; it will expire");
        }

        match &outcome {
            HostOutcome::Drained { moved, dropped } => {
                info!(host = %host, moved, dropped, "legacy queue drained")
            }
            HostOutcome::Interrupted { moved, dropped } => {
                warn!(host = %host, moved, dropped, "migration lock lost; drain interrupted")
            }
            HostOutcome::Failed { reason } => {
                error!(host = %host, reason = %reason, "legacy queue drain failed")
            }
            HostOutcome::Contended => {}
        }
        outcome
    }

    async fn drain(&self, host: &str, lost: &CancellationToken) -> HostOutcome {
        let legacy = self.keys.legacy_queue(host);
        let mut moved = 0;
        let mut dropped = 0;

        loop {
            if lost.is_cancelled() {
                return HostOutcome::Interrupted { moved, dropped };
            }

            // Newest first, pushed to the front: relative order survives.
            let entry = match self.store.pop_back(&legacy).await {
                Ok(Some(entry)) => entry,
                Ok(None) => return HostOutcome::Drained { moved, dropped },
                Err(err) => {
                    return HostOutcome::Failed {
                        reason: err.to_string(),
                    };
                }
            };
            let job_id = JobId(entry);

            let owner = match self.owners.resolve_owner(&job_id).await {
                Ok(owner) => owner,
                Err(err) => {
                    warn!(
                        host = %host,
                        job_id = %job_id,
                        error = %err,
                        "cannot resolve job owner; dropping legacy entry"
                    );
                    dropped += 1;
                    continue;
                }
            };

            if let Err(err) = self.user_jobs.enqueue_first(&owner, &job_id).await {
                if let Err(restore_err) = self.store.push_back(&legacy, job_id.as_str()).await {
                    error!(
                        host = %host,
                        job_id = %job_id,
                        error = %restore_err,
                        "failed to restore job id to legacy queue"
                    );
                }
                return HostOutcome::Failed {
                    reason: err.to_string(),
                };
            }
            moved += 1;
            debug!(host = %host, user = %owner, job_id = %job_id, "job migrated");

            if let Err(err) = self.user_databases.enqueue(&owner).await {
                warn!(
                    user = %owner,
                    error = %err,
                    "migrated job but failed to enqueue its user database"
                );
            }
        }
    }

    /// Run a pass every `interval` until `shutdown` fires.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "queue migrator started");
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("queue migrator shutting down");
                        break;
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = self.run().await {
                            error!(error = %err, "legacy queue discovery failed");
                        }
                    }
                }
            }
        })
    }
}

fn spawn_heartbeat(
    locks: HostLocks,
    guard: LockGuard,
    every: Duration,
    lost: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(every).await;
            match locks.renew(&guard).await {
                Ok(true) => debug!(resource = %guard.resource, "migration lock renewed"),
                Ok(false) => {
                    warn!(resource = %guard.resource, "migration lock no longer held");
                    lost.cancel();
                    break;
                }
                Err(err) => {
                    warn!(resource = %guard.resource, error = %err, "migration lock renewal failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct Owners(HashMap<String, String>);

    #[async_trait]
    impl JobOwnerLookup for Owners {
        async fn resolve_owner(&self, job_id: &JobId) -> Result<String> {
            self.0
                .get(job_id.as_str())
                .cloned()
                .ok_or_else(|| crate::error::BatchError::NotFound(format!("job {job_id}")))
        }
    }

    #[tokio::test]
    async fn discovery_ignores_user_queues() {
        let store = MemoryStore::new();
        store.push_back("batch:queues:hostA", "j1").await.unwrap();
        store.push_back("batch:queues:hostB", "j2").await.unwrap();
        store.push_back("batch:queue:u1", "j3").await.unwrap();
        store.push_back("batch:users", "u1").await.unwrap();

        let migrator = QueueMigrator::new(
            Arc::new(store),
            KeyspaceConfig::default(),
            Arc::new(Owners(HashMap::new())),
            &MigrationConfig::default(),
        );
        assert_eq!(
            migrator.discover_hosts().await.unwrap(),
            vec!["hostA".to_string(), "hostB".to_string()]
        );
    }

    #[tokio::test]
    async fn lost_lock_interrupts_drain() {
        let store = MemoryStore::new();
        for id in ["j1", "j2", "j3"] {
            store.push_back("batch:queues:hostA", id).await.unwrap();
        }
        let owners = Owners(
            ["j1", "j2", "j3"]
                .into_iter()
                .map(|j| (j.to_string(), "u1".to_string()))
                .collect(),
        );
        let migrator = QueueMigrator::new(
            Arc::new(store.clone()),
            KeyspaceConfig::default(),
            Arc::new(owners),
            &MigrationConfig::default(),
        );

        let lost = CancellationToken::new();
        lost.cancel();
        assert_eq!(
            migrator.drain("hostA", &lost).await,
            HostOutcome::Interrupted {
                moved: 0,
                dropped: 0
            }
        );
        assert_eq!(store.list_len("batch:queues:hostA").await.unwrap(), 3);
    }

    #[test]
    fn report_totals() {
        let report = MigrationReport {
            hosts: vec![
                HostMigration {
                    host: "a".into(),
                    outcome: HostOutcome::Drained {
                        moved: 2,
                        dropped: 1,
                    },
                },
                HostMigration {
                    host: "b".into(),
                    outcome: HostOutcome::Contended,
                },
                HostMigration {
                    host: "c".into(),
                    outcome: HostOutcome::Interrupted {
                        moved: 3,
                        dropped: 0,
                    },
                },
                HostMigration {
                    host: "d".into(),
                    outcome: HostOutcome::Failed {
                        reason: "boom".into(),
                    },
                },
            ],
        };
        assert_eq!(report.hosts_discovered(), 4);
        assert_eq!(report.moved(), 5);
        assert_eq!(report.dropped(), 1);
        assert_eq!(report.contended(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.outcome("b"), Some(&HostOutcome::Contended));
    }
}
