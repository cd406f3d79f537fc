use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// Physical database a tenant's jobs run against, as resolved by the metadata backend.
///
/// Lives only for the dispatch cycle that resolved it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDatabase {
    /// Tenant owning the database.
    pub user_name: String,
    /// Database host; the admission key.
    pub db_host: String,
    /// Database name on that host.
    pub db_name: String,
    /// Login role.
    pub db_user: String,
    /// Login password.
    pub db_password: String,
    /// Server port.
    pub db_port: u16,
}

impl fmt::Debug for UserDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDatabase")
            .field("user_name", &self.user_name)
            .field("db_host", &self.db_host)
            .field("db_name", &self.db_name)
            .field("db_user", &self.db_user)
            .field("db_password", &"<redacted>")
            .field("db_port", &self.db_port)
            .finish()
    }
}

/// Opaque job identifier as stored in queues and job storage.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Wrap a raw id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a [`Job`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be dispatched.
    Pending,
    /// Claimed by a runner.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
    /// Withdrawn before it ran.
    Cancelled,
}

impl JobStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the job has reached a final state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(BatchError::Internal(format!(
                "unknown job status '{other}'"
            ))),
        }
    }
}

/// A persisted batch job. Owned by job storage; the scheduler only reads it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier.
    pub id: JobId,
    /// Owning tenant.
    pub user_name: String,
    /// Current state.
    pub status: JobStatus,
    /// Submission time.
    pub created_at: DateTime<Utc>,
    /// Last status change; pending jobs are served oldest first.
    pub updated_at: DateTime<Utc>,
    /// SQL to execute on the tenant database.
    pub query: String,
}

/// Result of one capacity probe. Never cached beyond the refresh that produced it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostCapacitySample {
    /// Probed host.
    pub host: String,
    /// Always `>= 1`.
    pub available_cores: u32,
}

/// Everything the SQL runner needs to execute one job.
///
/// Whoever receives a `Dispatch` must call
/// [`HostAdmission::release`](crate::admission::HostAdmission::release) for
/// `host` exactly once when the job terminates.
#[derive(Debug)]
pub struct Dispatch<C> {
    /// Live connection to the tenant database.
    pub connection: C,
    /// Job to run.
    pub job: Job,
    /// Host holding the admission slot.
    pub host: String,
    /// Resolved tenant database.
    pub database: UserDatabase,
}
