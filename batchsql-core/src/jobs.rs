//! Persistent job storage as seen by the scheduler: read the oldest pending
//! job of a database, and find the owner of a job id.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{Job, JobId, UserDatabase};

/// Read side of job storage used by the dispatch path.
#[async_trait]
pub trait JobStorage: Send + Sync {
    /// Live handle the SQL runner executes the job on.
    type Connection: Send + 'static;

    /// The single oldest `pending` job for `database` (oldest `updated_at`
    /// first), together with a connection to that database. `None` when the
    /// database has no pending work.
    async fn fetch_oldest_pending(
        &self,
        database: &UserDatabase,
    ) -> Result<Option<(Self::Connection, Job)>>;

    /// Job `job_id` with a connection to `database`, provided it is still
    /// `pending` and owned by `database.user_name`. `None` otherwise.
    async fn fetch_pending(
        &self,
        database: &UserDatabase,
        job_id: &JobId,
    ) -> Result<Option<(Self::Connection, Job)>>;
}

/// Maps job ids to their owning user.
#[async_trait]
pub trait JobOwnerLookup: Send + Sync {
    /// User owning `job_id`, failing with
    /// [`BatchError::NotFound`](crate::error::BatchError::NotFound) for unknown ids.
    async fn resolve_owner(&self, job_id: &JobId) -> Result<String>;
}

#[cfg(feature = "database")]
pub use postgres::PostgresJobStorage;

#[cfg(feature = "database")]
mod postgres {
    use std::fmt;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::postgres::{PgConnectOptions, PgConnection};
    use sqlx::{ConnectOptions, PgPool};
    use tracing::{debug, info};

    use super::{JobOwnerLookup, JobStorage};
    use crate::error::{BatchError, Result};
    use crate::model::{Job, JobId, JobStatus, UserDatabase};

    const SCHEMA: &str = r#"
        CREATE TABLE IF NOT EXISTS batch_jobs (
            id TEXT PRIMARY KEY,
            user_name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            query TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        CREATE INDEX IF NOT EXISTS batch_jobs_pending_idx
            ON batch_jobs (user_name, updated_at)
            WHERE status = 'pending';
    "#;

    #[derive(sqlx::FromRow)]
    struct JobRow {
        id: String,
        user_name: String,
        status: String,
        query: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl TryFrom<JobRow> for Job {
        type Error = BatchError;

        fn try_from(row: JobRow) -> Result<Self> {
            Ok(Job {
                id: JobId(row.id),
                user_name: row.user_name,
                status: row.status.parse()?,
                created_at: row.created_at,
                updated_at: row.updated_at,
                query: row.query,
            })
        }
    }

    /// Jobs live in the `batch_jobs` catalog table; execution connections
    /// are opened against each tenant's own database.
    #[derive(Clone)]
    pub struct PostgresJobStorage {
        catalog: PgPool,
        connect_timeout: Duration,
    }

    impl fmt::Debug for PostgresJobStorage {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("PostgresJobStorage")
                .field("pool_size", &self.catalog.size())
                .field("idle_connections", &self.catalog.num_idle())
                .field("connect_timeout", &self.connect_timeout)
                .finish()
        }
    }

    impl PostgresJobStorage {
        /// Storage over the `batch_jobs` catalog pool.
        pub fn new(catalog: PgPool) -> Self {
            Self {
                catalog,
                connect_timeout: Duration::from_secs(10),
            }
        }

        /// Timeout for opening tenant connections.
        pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
            self.connect_timeout = timeout;
            self
        }

        /// Catalog pool.
        pub fn pool(&self) -> &PgPool {
            &self.catalog
        }

        /// Create the `batch_jobs` table and its pending index if missing.
        pub async fn initialize_schema(&self) -> Result<()> {
            sqlx::raw_sql(SCHEMA).execute(&self.catalog).await?;
            info!("batch_jobs schema ready");
            Ok(())
        }

        /// Move a job from `pending` to `running`. `false` means another
        /// worker got there first or the job is no longer pending.
        pub async fn claim(&self, job_id: &JobId) -> Result<bool> {
            let updated = sqlx::query(
                "UPDATE batch_jobs SET status = $2, updated_at = NOW() WHERE id = $1 AND status = $3",
            )
            .bind(job_id.as_str())
            .bind(JobStatus::Running.as_str())
            .bind(JobStatus::Pending.as_str())
            .execute(&self.catalog)
            .await?;
            Ok(updated.rows_affected() == 1)
        }

        /// Status transitions belong to the SQL runner; the scheduler never calls this.
        pub async fn mark_status(&self, job_id: &JobId, status: JobStatus) -> Result<()> {
            let updated = sqlx::query(
                "UPDATE batch_jobs SET status = $2, updated_at = NOW() WHERE id = $1",
            )
            .bind(job_id.as_str())
            .bind(status.as_str())
            .execute(&self.catalog)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(BatchError::NotFound(format!("job {job_id}")));
            }
            Ok(())
        }

        async fn open(&self, database: &UserDatabase) -> Result<PgConnection> {
            let options = self.connect_options(database);
            tokio::time::timeout(self.connect_timeout, options.connect())
                .await
                .map_err(|_| {
                    BatchError::Storage(sqlx::Error::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connecting to {} timed out", database.db_host),
                    )))
                })?
                .map_err(BatchError::from)
        }

        fn connect_options(&self, database: &UserDatabase) -> PgConnectOptions {
            PgConnectOptions::new()
                .host(&database.db_host)
                .port(database.db_port)
                .username(&database.db_user)
                .password(&database.db_password)
                .database(&database.db_name)
                .application_name("batchsql-worker")
                .disable_statement_logging()
        }
    }

    #[async_trait]
    impl JobStorage for PostgresJobStorage {
        type Connection = PgConnection;

        async fn fetch_oldest_pending(
            &self,
            database: &UserDatabase,
        ) -> Result<Option<(PgConnection, Job)>> {
            let row = sqlx::query_as::<_, JobRow>(
                r#"
                SELECT id, user_name, status, query, created_at, updated_at
                FROM batch_jobs
                WHERE user_name = $1 AND status = 'pending'
                ORDER BY updated_at ASC, created_at ASC
                LIMIT 1
                "#,
            )
            .bind(&database.user_name)
            .fetch_optional(&self.catalog)
            .await?;

            let Some(row) = row else {
                debug!(user = %database.user_name, "no pending job");
                return Ok(None);
            };
            let job = Job::try_from(row)?;
            Ok(Some((self.open(database).await?, job)))
        }

        async fn fetch_pending(
            &self,
            database: &UserDatabase,
            job_id: &JobId,
        ) -> Result<Option<(PgConnection, Job)>> {
            let row = sqlx::query_as::<_, JobRow>(
                r#"
                SELECT id, user_name, status, query, created_at, updated_at
                FROM batch_jobs
                WHERE id = $1 AND user_name = $2 AND status = 'pending'
                "#,
            )
            .bind(job_id.as_str())
            .bind(&database.user_name)
            .fetch_optional(&self.catalog)
            .await?;

            let Some(row) = row else {
                debug!(user = %database.user_name, job_id = %job_id, "queued job is not pending");
                return Ok(None);
            };
            let job = Job::try_from(row)?;
            Ok(Some((self.open(database).await?, job)))
        }
    }

    #[async_trait]
    impl JobOwnerLookup for PostgresJobStorage {
        async fn resolve_owner(&self, job_id: &JobId) -> Result<String> {
            sqlx::query_scalar::<_, String>("SELECT user_name FROM batch_jobs WHERE id = $1")
                .bind(job_id.as_str())
                .fetch_optional(&self.catalog)
                .await?
                .ok_or_else(|| BatchError::NotFound(format!("job {job_id}")))
        }
    }
}
