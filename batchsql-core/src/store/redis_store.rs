use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use tracing::{debug, info};

use super::{ScanPage, SharedStore};
use crate::error::{BatchError, Result};

/// Redis scripts for owner-checked lock operations
mod scripts {
    use redis::Script;

    pub fn compare_and_delete() -> Script {
        Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            end
            return 0
            "#,
        )
    }

    pub fn compare_and_expire() -> Script {
        Script::new(
            r#"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('PEXPIRE', KEYS[1], ARGV[2])
            end
            return 0
            "#,
        )
    }
}

/// [`SharedStore`] on a Redis `ConnectionManager`.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    compare_and_delete: std::sync::Arc<Script>,
    compare_and_expire: std::sync::Arc<Script>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

impl RedisStore {
    /// Open a managed connection to `redis_url`.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis shared store at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| BatchError::Store(format!("Failed to create Redis client: {e}")))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| BatchError::Store(format!("Failed to connect to Redis: {e}")))?;

        info!("Successfully connected to Redis shared store");

        Ok(Self::from_connection(conn))
    }

    /// Wrap an existing connection.
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self {
            conn,
            compare_and_delete: std::sync::Arc::new(scripts::compare_and_delete()),
            compare_and_expire: std::sync::Arc::new(scripts::compare_and_expire()),
        }
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn push_back(&self, key: &str, value: &str) -> Result<usize> {
        debug!("Store RPUSH: {} <- {}", key, value);
        let mut conn = self.conn.clone();
        Ok(conn.rpush::<_, _, usize>(key, value).await?)
    }

    async fn push_front(&self, key: &str, value: &str) -> Result<usize> {
        debug!("Store LPUSH: {} <- {}", key, value);
        let mut conn = self.conn.clone();
        Ok(conn.lpush::<_, _, usize>(key, value).await?)
    }

    async fn pop_front(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lpop::<_, Option<String>>(key, None).await?)
    }

    async fn pop_back(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.rpop::<_, Option<String>>(key, None).await?)
    }

    async fn list_len(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.llen::<_, usize>(key).await?)
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.lrange::<_, Vec<String>>(key, 0, -1).await?)
    }

    async fn scan(&self, cursor: u64, pattern: &str, count: usize) -> Result<ScanPage> {
        let mut conn = self.conn.clone();
        let (cursor, keys) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count.max(1))
            .query_async::<(u64, Vec<String>)>(&mut conn)
            .await?;
        Ok(ScanPage { cursor, keys })
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let reply = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<Option<String>>(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed = self
            .compare_and_delete
            .key(key)
            .arg(expected)
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn expire_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let updated = self
            .compare_and_expire
            .key(key)
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async::<i64>(&mut conn)
            .await?;
        Ok(updated == 1)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall::<_, HashMap<String, String>>(key).await?)
    }
}
