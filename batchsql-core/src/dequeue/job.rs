use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use super::DatabaseDequeuer;
use crate::error::Result;
use crate::jobs::JobStorage;
use crate::model::{Dispatch, Job, JobId, UserDatabase};
use crate::queue::UserJobQueue;

/// Turns an admitted database into a runnable job.
///
/// Job ids queued on the user's current-generation list (`batch:queue:<user>`)
/// run first, front to back. Once that list is empty the oldest pending job
/// in job storage is used.
pub struct JobDequeuer<J: JobStorage> {
    databases: DatabaseDequeuer,
    user_jobs: UserJobQueue,
    storage: Arc<J>,
}

impl<J: JobStorage> Clone for JobDequeuer<J> {
    fn clone(&self) -> Self {
        Self {
            databases: self.databases.clone(),
            user_jobs: self.user_jobs.clone(),
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<J: JobStorage> fmt::Debug for JobDequeuer<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDequeuer")
            .field("databases", &self.databases)
            .field("user_jobs", &self.user_jobs)
            .field("storage", &std::any::type_name::<J>())
            .finish()
    }
}

impl<J: JobStorage> JobDequeuer<J> {
    /// Dequeuer reading queued job ids from `user_jobs` before `storage`.
    pub fn new(databases: DatabaseDequeuer, user_jobs: UserJobQueue, storage: Arc<J>) -> Self {
        Self {
            databases,
            user_jobs,
            storage,
        }
    }

    /// Database-level dequeuer this one delegates to.
    pub fn databases(&self) -> &DatabaseDequeuer {
        &self.databases
    }

    /// Next job ready to hand to the SQL runner.
    ///
    /// The returned [`Dispatch`] holds an admission slot on its host. When the
    /// admitted database turns out to have no pending job, or job storage
    /// fails, the slot is released here. A transient storage failure also
    /// puts the user back in the queue so the pending job is not forgotten.
    pub async fn next(&self) -> Result<Option<Dispatch<J::Connection>>> {
        let Some(database) = self.databases.next().await? else {
            return Ok(None);
        };
        let host = database.db_host.clone();
        let admission = self.databases.admission();

        match self.fetch(&database).await {
            Ok(Some((connection, job))) => {
                debug!(
                    user = %database.user_name,
                    host = %host,
                    job_id = %job.id,
                    "job dequeued"
                );
                Ok(Some(Dispatch {
                    connection,
                    job,
                    host,
                    database,
                }))
            }
            Ok(None) => {
                admission.release(&host).await;
                debug!(
                    user = %database.user_name,
                    host = %host,
                    "no pending job; admission slot released"
                );
                Ok(None)
            }
            Err(err) => {
                admission.release(&host).await;
                warn!(
                    user = %database.user_name,
                    host = %host,
                    error = %err,
                    "job storage lookup failed; admission slot released"
                );
                if err.is_transient()
                    && let Err(requeue) = self.databases.queue().enqueue(&database.user_name).await
                {
                    error!(
                        user = %database.user_name,
                        error = %requeue,
                        "failed to re-enqueue user database; its pending jobs wait for the next enqueue"
                    );
                }
                Err(err)
            }
        }
    }

    /// Put `job_id` back at the front of its user's job list after a
    /// dispatch that never started.
    pub async fn restore(&self, user_name: &str, job_id: &JobId) -> Result<()> {
        self.user_jobs.enqueue_first(user_name, job_id).await?;
        Ok(())
    }

    async fn fetch(&self, database: &UserDatabase) -> Result<Option<(J::Connection, Job)>> {
        let user_name = &database.user_name;
        while let Some(job_id) = self.user_jobs.dequeue(user_name).await? {
            match self.storage.fetch_pending(database, &job_id).await {
                Ok(Some(found)) => return Ok(Some(found)),
                Ok(None) => {
                    debug!(user = %user_name, job_id = %job_id, "queued job no longer pending; skipped");
                }
                Err(err) => {
                    if err.is_transient()
                        && let Err(restore) = self.user_jobs.enqueue_first(user_name, &job_id).await
                    {
                        error!(
                            user = %user_name,
                            job_id = %job_id,
                            error = %restore,
                            "failed to restore queued job id"
                        );
                    }
                    return Err(err);
                }
            }
        }
        self.storage.fetch_oldest_pending(database).await
    }
}
