use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::config::KeyspaceConfig;
use crate::error::Result;
use crate::model::JobId;
use crate::store::SharedStore;

/// FIFO of user names whose databases have work ready.
///
/// Entries carry no payload; everything else is re-read from the metadata
/// backend and job storage when the entry is dequeued. The store's atomic pop
/// guarantees concurrent consumers never receive the same entry.
#[derive(Clone)]
pub struct UserDatabaseQueue {
    store: Arc<dyn SharedStore>,
    key: String,
}

impl fmt::Debug for UserDatabaseQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserDatabaseQueue")
            .field("key", &self.key)
            .finish()
    }
}

impl UserDatabaseQueue {
    /// Queue at `keys.user_database_queue`.
    pub fn new(store: Arc<dyn SharedStore>, keys: &KeyspaceConfig) -> Self {
        Self::with_key(store, keys.user_database_queue.clone())
    }

    /// Queue at an explicit key.
    pub fn with_key(store: Arc<dyn SharedStore>, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Store key of the queue.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Append `user_name` behind everything already queued.
    pub async fn enqueue(&self, user_name: &str) -> Result<usize> {
        let len = self.store.push_back(&self.key, user_name).await?;
        debug!(queue = %self.key, user = %user_name, len, "user database enqueued");
        Ok(len)
    }

    /// Oldest entry, or `None` when the queue is empty.
    pub async fn dequeue(&self) -> Result<Option<String>> {
        self.store.pop_front(&self.key).await
    }

    /// Entries currently queued.
    pub async fn len(&self) -> Result<usize> {
        self.store.list_len(&self.key).await
    }

    /// Whether nothing is queued.
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Current-generation per-tenant queue of job ids (`<prefix><user>`).
#[derive(Clone)]
pub struct UserJobQueue {
    store: Arc<dyn SharedStore>,
    keys: KeyspaceConfig,
}

impl fmt::Debug for UserJobQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserJobQueue")
            .field("prefix", &self.keys.user_queue_prefix)
            .finish()
    }
}

impl UserJobQueue {
    /// Queues under `keys.user_queue_prefix`.
    pub fn new(store: Arc<dyn SharedStore>, keys: KeyspaceConfig) -> Self {
        Self { store, keys }
    }

    /// Queue `job_id` behind the user's other jobs.
    pub async fn enqueue(&self, user_name: &str, job_id: &JobId) -> Result<usize> {
        self.store
            .push_back(&self.keys.user_queue(user_name), job_id.as_str())
            .await
    }

    /// Queue `job_id` ahead of every job already waiting for `user_name`.
    pub async fn enqueue_first(&self, user_name: &str, job_id: &JobId) -> Result<usize> {
        self.store
            .push_front(&self.keys.user_queue(user_name), job_id.as_str())
            .await
    }

    /// Next job id for `user_name`, front first.
    pub async fn dequeue(&self, user_name: &str) -> Result<Option<JobId>> {
        Ok(self
            .store
            .pop_front(&self.keys.user_queue(user_name))
            .await?
            .map(JobId))
    }

    /// Snapshot of the user's queue, front first.
    pub async fn jobs(&self, user_name: &str) -> Result<Vec<JobId>> {
        Ok(self
            .store
            .list_range(&self.keys.user_queue(user_name))
            .await?
            .into_iter()
            .map(JobId)
            .collect())
    }
}
