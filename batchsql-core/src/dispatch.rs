//! One dispatch cycle: dequeue, admit, fetch job, hand off.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};

use crate::dequeue::JobDequeuer;
use crate::error::Result;
use crate::jobs::JobStorage;
use crate::model::Dispatch;

/// Boundary to the SQL runner.
///
/// On `Ok` the runner owns the dispatch and must call
/// [`HostAdmission::release`](crate::admission::HostAdmission::release) for
/// `dispatch.host` exactly once when the job terminates. On `Err` the job was
/// not started and the cycle releases the slot itself.
#[async_trait]
pub trait ExecutionHandoff<C: Send + 'static>: Send + Sync {
    /// Start executing `dispatch`. Returns once the job is accepted, not finished.
    async fn handoff(&self, dispatch: Dispatch<C>) -> Result<()>;
}

/// What a single dispatch cycle did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing was dispatched this tick.
    Idle,
    /// One job was handed to the runner.
    Dispatched,
}

/// One unit of scheduling work, driven by the [`Launcher`](crate::launcher::Launcher).
#[async_trait]
pub trait DispatchCycle: Send + Sync {
    /// Run one cycle. Errors are logged by the caller and never stop the timer.
    async fn run_cycle(&self) -> Result<CycleOutcome>;
}

/// Dispatch cycle feeding the [`JobDequeuer`] into an [`ExecutionHandoff`].
pub struct Dispatcher<J: JobStorage, H> {
    jobs: JobDequeuer<J>,
    handoff: Arc<H>,
}

impl<J: JobStorage, H> fmt::Debug for Dispatcher<J, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("jobs", &self.jobs)
            .field("handoff", &std::any::type_name::<H>())
            .finish()
    }
}

impl<J, H> Dispatcher<J, H>
where
    J: JobStorage,
    H: ExecutionHandoff<J::Connection>,
{
    /// Cycle pulling from `jobs` and handing off to `handoff`.
    pub fn new(jobs: JobDequeuer<J>, handoff: Arc<H>) -> Self {
        Self { jobs, handoff }
    }
}

#[async_trait]
impl<J, H> DispatchCycle for Dispatcher<J, H>
where
    J: JobStorage + 'static,
    H: ExecutionHandoff<J::Connection> + 'static,
{
    async fn run_cycle(&self) -> Result<CycleOutcome> {
        let Some(dispatch) = self.jobs.next().await? else {
            return Ok(CycleOutcome::Idle);
        };

        let host = dispatch.host.clone();
        let user_name = dispatch.database.user_name.clone();
        let job_id = dispatch.job.id.clone();

        match self.handoff.handoff(dispatch).await {
            Ok(()) => {
                info!(user = %user_name, host = %host, job_id = %job_id, "job handed off");
                Ok(CycleOutcome::Dispatched)
            }
            Err(err) => {
                error!(
                    user = %user_name,
                    host = %host,
                    job_id = %job_id,
                    error = %err,
                    "handoff failed; releasing slot and re-enqueueing user"
                );
                let databases = self.jobs.databases();
                databases.admission().release(&host).await;
                if let Err(restore) = self.jobs.restore(&user_name, &job_id).await {
                    error!(
                        user = %user_name,
                        job_id = %job_id,
                        error = %restore,
                        "failed to restore job id to the front of the user queue"
                    );
                }
                if let Err(requeue) = databases.queue().enqueue(&user_name).await {
                    error!(
                        user = %user_name,
                        error = %requeue,
                        "failed to re-enqueue user database; its pending jobs wait for the next enqueue"
                    );
                }
                Err(err)
            }
        }
    }
}
