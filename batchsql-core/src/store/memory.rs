use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::Mutex;

use super::{ScanPage, SharedStore};
use crate::error::{BatchError, Result};

#[derive(Debug)]
struct ExpiringValue {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct MemoryState {
    lists: HashMap<String, VecDeque<String>>,
    strings: HashMap<String, ExpiringValue>,
    hashes: HashMap<String, HashMap<String, String>>,
}

impl MemoryState {
    fn purge_expired(&mut self, now: Instant) {
        self.strings.retain(|_, entry| entry.expires_at > now);
    }

    fn live_string(&mut self, key: &str, now: Instant) -> Option<&mut ExpiringValue> {
        self.purge_expired(now);
        self.strings.get_mut(key)
    }

    fn all_keys(&self) -> BTreeSet<&str> {
        self.lists
            .keys()
            .chain(self.strings.keys())
            .chain(self.hashes.keys())
            .map(String::as_str)
            .collect()
    }
}

/// Process-local [`SharedStore`] with the same single-key atomicity and
/// expiry semantics as the Redis backend. Used by tests and single-process
/// development runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("MemoryStore");
        match self.state.try_lock() {
            Ok(state) => {
                debug
                    .field("lists", &state.lists.len())
                    .field("strings", &state.strings.len())
                    .field("hashes", &state.hashes.len());
            }
            Err(_) => {
                debug.field("state", &"<locked>");
            }
        }
        debug.finish()
    }
}

impl MemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a hash, e.g. a metadata backend record.
    pub async fn insert_hash<I, K, V>(&self, key: &str, fields: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut state = self.state.lock().await;
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.into(), value.into());
        }
    }

    /// Current value of an unexpired string key.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        state
            .live_string(key, Instant::now())
            .map(|entry| entry.value.clone())
    }
}

/// Translate a Redis glob (`*`, `?`, `[...]`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expr = String::with_capacity(pattern.len() + 2);
    expr.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => expr.push_str(".*"),
            '?' => expr.push('.'),
            '[' => {
                expr.push('[');
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner == '\\' {
                        expr.push_str("\\\\");
                    } else {
                        expr.push(inner);
                    }
                }
                expr.push(']');
            }
            '\\' => {
                if let Some(escaped) = chars.next() {
                    expr.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => expr.push_str(&regex::escape(&other.to_string())),
        }
    }
    expr.push('$');
    Regex::new(&expr)
        .map_err(|e| BatchError::Internal(format!("invalid key pattern '{pattern}': {e}")))
}

#[async_trait]
impl SharedStore for MemoryStore {
    async fn push_back(&self, key: &str, value: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len())
    }

    async fn push_front(&self, key: &str, value: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let list = state.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len())
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(None);
        };
        let value = list.pop_front();
        if list.is_empty() {
            state.lists.remove(key);
        }
        Ok(value)
    }

    async fn pop_back(&self, key: &str) -> Result<Option<String>> {
        let mut state = self.state.lock().await;
        let Some(list) = state.lists.get_mut(key) else {
            return Ok(None);
        };
        let value = list.pop_back();
        if list.is_empty() {
            state.lists.remove(key);
        }
        Ok(value)
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let state = self.state.lock().await;
        Ok(state.lists.get(key).map(VecDeque::len).unwrap_or(0))
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        Ok(state
            .lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let matcher = glob_to_regex(pattern)?;
        let mut state = self.state.lock().await;
        state.purge_expired(Instant::now());

        // The cursor is an offset into the sorted key set.
        let keys = state.all_keys();
        let start = cursor as usize;
        let count = count.max(1);
        let page: Vec<String> = keys
            .iter()
            .skip(start)
            .take(count)
            .filter(|key| matcher.is_match(key))
            .map(|key| key.to_string())
            .collect();
        let next = start + count;
        let cursor = if next >= keys.len() { 0 } else { next as u64 };
        Ok(ScanPage { cursor, keys: page })
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        if state.live_string(key, now).is_some() {
            return Ok(false);
        }
        state.strings.insert(
            key.to_string(),
            ExpiringValue {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let owned = state
            .live_string(key, Instant::now())
            .is_some_and(|entry| entry.value == expected);
        if owned {
            state.strings.remove(key);
        }
        Ok(owned)
    }

    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.live_string(key, now) {
            Some(entry) if entry.value == expected => {
                entry.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let state = self.state.lock().await;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::scan_all;

    #[test]
    fn glob_matches_like_redis() {
        let re = glob_to_regex("batch:queues:*").unwrap();
        assert!(re.is_match("batch:queues:db1.internal"));
        assert!(!re.is_match("batch:queue:u1"));

        let re = glob_to_regex("h?st[12]").unwrap();
        assert!(re.is_match("host1"));
        assert!(!re.is_match("host3"));
    }

    #[tokio::test]
    async fn scan_pages_until_cursor_zero() {
        let store = MemoryStore::new();
        for i in 0..25 {
            store
                .push_back(&format!("batch:queues:host{i}"), "job")
                .await
                .unwrap();
        }
        store.push_back("batch:queue:u1", "job").await.unwrap();

        let first = store.scan(0, "batch:queues:*", 10).await.unwrap();
        assert_ne!(first.cursor, 0);

        let keys = scan_all(&store, "batch:queues:*", 10).await.unwrap();
        assert_eq!(keys.len(), 25);
        assert!(keys.iter().all(|k| k.starts_with("batch:queues:")));
    }

    #[tokio::test]
    async fn set_if_absent_honours_expiry() {
        let store = MemoryStore::new();
        assert!(
            store
                .set_if_absent("lock", "a", Duration::from_millis(20))
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_if_absent("lock", "b", Duration::from_millis(20))
                .await
                .unwrap()
        );
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(
            store
                .set_if_absent("lock", "b", Duration::from_secs(5))
                .await
                .unwrap()
        );
        assert!(!store.delete_if_equals("lock", "a").await.unwrap());
        assert!(store.delete_if_equals("lock", "b").await.unwrap());
        assert_eq!(store.get("lock").await, None);
    }

    #[tokio::test]
    async fn empty_lists_disappear() {
        let store = MemoryStore::new();
        store.push_back("q", "a").await.unwrap();
        assert_eq!(store.pop_back("q").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.pop_front("q").await.unwrap(), None);
        let keys = scan_all(&store, "*", 10).await.unwrap();
        assert!(keys.is_empty());
    }
}
