use std::sync::Arc;
use std::time::Duration;

use batchsql_core::{KeyspaceConfig, LegacyQueueStream, MemoryStore, SharedStore};
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

fn stream(store: &MemoryStore, shutdown: CancellationToken) -> LegacyQueueStream {
    LegacyQueueStream::new(
        Arc::new(store.clone()),
        &KeyspaceConfig::default(),
        "hostA",
        Duration::from_millis(5),
        shutdown,
    )
}

#[tokio::test]
async fn yields_entries_in_queue_order() {
    let store = MemoryStore::new();
    for user in ["u1", "u2", "u3"] {
        store.push_back("batch:queues:hostA", user).await.unwrap();
    }

    let shutdown = CancellationToken::new();
    let legacy = stream(&store, shutdown.clone());
    assert_eq!(legacy.key(), "batch:queues:hostA");

    let items: Vec<String> = legacy
        .into_stream()
        .take(3)
        .map(|item| item.unwrap())
        .collect()
        .await;
    assert_eq!(items, vec!["u1", "u2", "u3"]);
    assert_eq!(store.list_len("batch:queues:hostA").await.unwrap(), 0);
}

#[tokio::test]
async fn empty_queue_waits_for_new_entries() {
    let store = MemoryStore::new();
    let shutdown = CancellationToken::new();
    let mut items = Box::pin(stream(&store, shutdown.clone()).into_stream());

    let producer = {
        let store = store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            store.push_back("batch:queues:hostA", "late").await.unwrap();
        })
    };

    let next = tokio::time::timeout(Duration::from_secs(2), items.next())
        .await
        .expect("stream should produce the late entry");
    assert_eq!(next.unwrap().unwrap(), "late");
    producer.await.unwrap();
}

#[tokio::test]
async fn cancellation_ends_an_idle_stream() {
    let store = MemoryStore::new();
    let shutdown = CancellationToken::new();
    let mut items = Box::pin(stream(&store, shutdown.clone()).into_stream());

    let canceller = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            shutdown.cancel();
        })
    };

    let end = tokio::time::timeout(Duration::from_secs(2), items.next())
        .await
        .expect("cancelled stream should end");
    assert!(end.is_none());
    canceller.await.unwrap();
}
