use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::admission::HostAdmission;
use crate::error::Result;
use crate::metadata::MetadataBackend;
use crate::model::UserDatabase;
use crate::queue::UserDatabaseQueue;

/// Pops candidate users and admits them against their database host.
#[derive(Clone)]
pub struct DatabaseDequeuer {
    queue: UserDatabaseQueue,
    metadata: Arc<dyn MetadataBackend>,
    admission: HostAdmission,
}

impl fmt::Debug for DatabaseDequeuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseDequeuer")
            .field("queue", &self.queue)
            .field("admission", &self.admission)
            .finish()
    }
}

impl DatabaseDequeuer {
    /// Dequeuer over `queue`, resolving users through `metadata`.
    pub fn new(
        queue: UserDatabaseQueue,
        metadata: Arc<dyn MetadataBackend>,
        admission: HostAdmission,
    ) -> Self {
        Self {
            queue,
            metadata,
            admission,
        }
    }

    /// Queue candidates are popped from.
    pub fn queue(&self) -> &UserDatabaseQueue {
        &self.queue
    }

    /// Admission counter slots are taken from.
    pub fn admission(&self) -> &HostAdmission {
        &self.admission
    }

    /// Next admitted database, or `None` when the queue is empty or the
    /// candidate's host is saturated.
    ///
    /// An admitted database holds one slot on its host; the caller must
    /// release it. A saturated candidate goes to the back of the queue. A
    /// metadata failure propagates and the popped entry is not re-enqueued.
    pub async fn next(&self) -> Result<Option<UserDatabase>> {
        let Some(user_name) = self.queue.dequeue().await? else {
            return Ok(None);
        };

        let database = match self.metadata.resolve(&user_name).await {
            Ok(database) => database,
            Err(err) => {
                warn!(
                    user = %user_name,
                    error = %err,
                    "metadata resolution failed; dropping queue entry for this cycle"
                );
                return Err(err);
            }
        };

        if self.admission.try_admit(&database.db_host).await {
            debug!(user = %user_name, host = %database.db_host, "database admitted");
            return Ok(Some(database));
        }

        if let Err(err) = self.queue.enqueue(&user_name).await {
            error!(
                user = %user_name,
                host = %database.db_host,
                error = %err,
                "failed to re-enqueue rejected user database"
            );
            return Err(err);
        }
        debug!(
            user = %user_name,
            host = %database.db_host,
            "host saturated; user database re-enqueued"
        );
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyspaceConfig;
    use crate::error::BatchError;
    use crate::metadata::MockMetadataBackend;
    use crate::store::{MemoryStore, SharedStore};

    fn database(user: &str, host: &str) -> UserDatabase {
        UserDatabase {
            user_name: user.to_string(),
            db_host: host.to_string(),
            db_name: format!("{user}_db"),
            db_user: user.to_string(),
            db_password: String::new(),
            db_port: 5432,
        }
    }

    fn queue(store: &MemoryStore) -> UserDatabaseQueue {
        UserDatabaseQueue::new(Arc::new(store.clone()), &KeyspaceConfig::default())
    }

    #[tokio::test]
    async fn empty_queue_never_touches_metadata() {
        let store = MemoryStore::new();
        let mut metadata = MockMetadataBackend::new();
        metadata.expect_resolve().never();

        let dequeuer = DatabaseDequeuer::new(queue(&store), Arc::new(metadata), HostAdmission::new(1));
        assert!(dequeuer.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn metadata_failure_propagates_and_drops_entry() {
        let store = MemoryStore::new();
        let queue = queue(&store);
        queue.enqueue("u1").await.unwrap();

        let mut metadata = MockMetadataBackend::new();
        metadata
            .expect_resolve()
            .times(1)
            .returning(|user| {
                assert_eq!(user, "u1");
                Err(BatchError::NotFound(format!("user {user}")))
            });

        let admission = HostAdmission::new(1);
        let dequeuer = DatabaseDequeuer::new(queue.clone(), Arc::new(metadata), admission.clone());

        let err = dequeuer.next().await.unwrap_err();
        assert!(err.is_not_found());
        assert!(queue.is_empty().await.unwrap());
        assert!(admission.known_hosts().await.is_empty());
    }

    #[tokio::test]
    async fn saturated_host_sends_entry_to_the_back() {
        let store = MemoryStore::new();
        let queue = queue(&store);
        queue.enqueue("u1").await.unwrap();
        queue.enqueue("u2").await.unwrap();

        let mut metadata = MockMetadataBackend::new();
        metadata
            .expect_resolve()
            .returning(|user| Ok(database(user, "db1")));

        let admission = HostAdmission::new(1);
        assert!(admission.try_admit("db1").await);

        let dequeuer = DatabaseDequeuer::new(queue.clone(), Arc::new(metadata), admission.clone());
        assert!(dequeuer.next().await.unwrap().is_none());

        assert_eq!(
            store.list_range(queue.key()).await.unwrap(),
            vec!["u2".to_string(), "u1".to_string()]
        );
        assert_eq!(admission.utilization("db1").await.inflight, 1);
    }

    #[tokio::test]
    async fn admitted_database_holds_a_slot() {
        let store = MemoryStore::new();
        let queue = queue(&store);
        queue.enqueue("u1").await.unwrap();

        let mut metadata = MockMetadataBackend::new();
        metadata
            .expect_resolve()
            .returning(|user| Ok(database(user, "db1")));

        let admission = HostAdmission::new(2);
        let dequeuer = DatabaseDequeuer::new(queue.clone(), Arc::new(metadata), admission.clone());

        let admitted = dequeuer.next().await.unwrap().expect("admitted database");
        assert_eq!(admitted.user_name, "u1");
        assert_eq!(admission.utilization("db1").await.inflight, 1);
        assert!(queue.is_empty().await.unwrap());
    }
}
