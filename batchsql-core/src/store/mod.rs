//! Shared key-value store used for queues, locks and the metadata hashes.
//!
//! Every operation is a single round trip with single-key atomicity. Lists
//! follow one convention: `push_back` appends, `pop_front` consumes, so a list
//! driven only through those two calls is FIFO.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// In-memory backend.
pub mod memory;
/// Redis backend.
#[cfg(feature = "database")]
pub mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "database")]
pub use redis_store::RedisStore;

/// One page of a cursor-based key scan. `cursor == 0` means the scan is complete.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor for the next call.
    pub cursor: u64,
    /// Keys matched on this page.
    pub keys: Vec<String>,
}

/// Operations the scheduler needs from the shared store.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Append to the tail. Returns the new list length.
    async fn push_back(&self, key: &str, value: &str) -> Result<usize>;

    /// Insert at the head, ahead of everything already queued.
    async fn push_front(&self, key: &str, value: &str) -> Result<usize>;

    /// Remove and return the head, or `None` when empty.
    async fn pop_front(&self, key: &str) -> Result<Option<String>>;

    /// Remove and return the tail, or `None` when empty.
    async fn pop_back(&self, key: &str) -> Result<Option<String>>;

    /// Length of a list; missing keys count as empty.
    async fn list_len(&self, key: &str) -> Result<usize>;

    /// Snapshot of a whole list, head first.
    async fn list_range(&self, key: &str) -> Result<Vec<String>>;

    /// One step of a cursor scan over keys matching a glob `pattern`.
    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage>;

    /// Store `value` under `key` only if the key is absent, expiring after `ttl`.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Delete `key` only if it currently holds `expected`.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool>;

    /// Reset the expiry of `key` only if it currently holds `expected`.
    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool>;

    /// Every field of a hash; empty when the key is missing.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;
}

/// Run a cursor scan to completion and collect every matching key.
pub async fn scan_all(
    store: &dyn SharedStore,
    pattern: &str,
    page_size: usize,
) -> Result<Vec<String>> {
    let mut keys = Vec::new();
    let mut cursor = 0;
    loop {
        let page = store.scan(cursor, pattern, page_size).await?;
        keys.extend(page.keys);
        if page.cursor == 0 {
            break;
        }
        cursor = page.cursor;
    }
    // SCAN may return a key more than once.
    keys.sort();
    keys.dedup();
    Ok(keys)
}
