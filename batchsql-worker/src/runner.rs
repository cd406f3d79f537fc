//! Postgres execution handoff: runs a dispatched job's SQL on the tenant
//! connection and gives the host slot back when it finishes.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use batchsql_core::jobs::PostgresJobStorage;
use batchsql_core::{
    BatchError, Dispatch, ExecutionHandoff, HostAdmission, JobStatus, Result, UserDatabaseQueue,
};
use futures::FutureExt;
use sqlx::Connection;
use sqlx::postgres::PgConnection;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct PgQueryRunner {
    storage: Arc<PostgresJobStorage>,
    admission: HostAdmission,
    queue: UserDatabaseQueue,
    tracker: TaskTracker,
}

impl PgQueryRunner {
    pub fn new(
        storage: Arc<PostgresJobStorage>,
        admission: HostAdmission,
        queue: UserDatabaseQueue,
    ) -> Self {
        Self {
            storage,
            admission,
            queue,
            tracker: TaskTracker::new(),
        }
    }

    /// Stop accepting jobs and wait for the running ones to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        info!(running = self.tracker.len(), "waiting for running jobs");
        self.tracker.wait().await;
    }
}

#[async_trait]
impl ExecutionHandoff<PgConnection> for PgQueryRunner {
    async fn handoff(&self, dispatch: Dispatch<PgConnection>) -> Result<()> {
        if self.tracker.is_closed() {
            return Err(BatchError::Internal("runner is shutting down".into()));
        }
        if !self.storage.claim(&dispatch.job.id).await? {
            return Err(BatchError::Internal(format!(
                "job {} is no longer pending",
                dispatch.job.id
            )));
        }

        let storage = Arc::clone(&self.storage);
        let admission = self.admission.clone();
        let queue = self.queue.clone();

        self.tracker.spawn(async move {
            let Dispatch {
                mut connection,
                job,
                host,
                database,
            } = dispatch;
            let user_name = database.user_name.clone();
            let slot_host = host.clone();

            let execution = async move {
                let started = Instant::now();
                let status = match sqlx::Executor::execute(&mut connection, sqlx::raw_sql(&job.query)).await {
                    Ok(result) => {
                        info!(
                            user = %database.user_name,
                            host = %host,
                            job_id = %job.id,
                            rows_affected = result.rows_affected(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "job finished"
                        );
                        JobStatus::Done
                    }
                    Err(err) => {
                        warn!(
                            user = %database.user_name,
                            host = %host,
                            job_id = %job.id,
                            error = %err,
                            "job failed"
                        );
                        JobStatus::Failed
                    }
                };

                if let Err(err) = storage.mark_status(&job.id, status).await {
                    error!(job_id = %job.id, status = %status, error = %err, "failed to record job status");
                }
                if let Err(err) = connection.close().await {
                    debug!(host = %host, error = %err, "closing tenant connection failed");
                }
            };

            settle(execution, &admission, &queue, &slot_host, &user_name).await;
        });
        Ok(())
    }
}

/// Drive `execution` to completion, then give the host slot back and
/// re-enqueue the user. Runs even when `execution` panics.
async fn settle<F>(
    execution: F,
    admission: &HostAdmission,
    queue: &UserDatabaseQueue,
    host: &str,
    user_name: &str,
) where
    F: Future<Output = ()>,
{
    if AssertUnwindSafe(execution).catch_unwind().await.is_err() {
        error!(user = %user_name, host = %host, "job task panicked");
    }

    admission.release(host).await;

    // The user may have more pending jobs; the no-work path drops the entry if not.
    if let Err(err) = queue.enqueue(user_name).await {
        error!(user = %user_name, error = %err, "failed to re-enqueue user database");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchsql_core::{KeyspaceConfig, MemoryStore};

    fn queue() -> UserDatabaseQueue {
        UserDatabaseQueue::new(Arc::new(MemoryStore::new()), &KeyspaceConfig::default())
    }

    #[tokio::test]
    async fn finished_job_releases_slot_and_requeues_user() {
        let admission = HostAdmission::new(1);
        let queue = queue();
        assert!(admission.try_admit("db1").await);

        settle(async {}, &admission, &queue, "db1", "u1").await;

        assert_eq!(admission.utilization("db1").await.inflight, 0);
        assert_eq!(queue.dequeue().await.unwrap().as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn panicking_job_still_releases_its_slot() {
        let admission = HostAdmission::new(1);
        let queue = queue();
        assert!(admission.try_admit("db1").await);

        settle(
            async { panic!("driver bug"); },
            &admission,
            &queue,
            "db1",
            "u1",
        )
        .await;

        assert_eq!(admission.utilization("db1").await.inflight, 0);
        assert!(admission.try_admit("db1").await);
        assert_eq!(queue.dequeue().await.unwrap().as_deref(), Some("u1"));
    }
}
