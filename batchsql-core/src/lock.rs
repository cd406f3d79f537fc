//! Cross-process mutual exclusion over the shared store.
//!
//! A lock is a key holding the holder's token with a millisecond expiry.
//! Release and renewal only succeed for the token that acquired it, and the
//! expiry frees the resource if the holder crashes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::KeyspaceConfig;
use crate::error::Result;
use crate::store::SharedStore;

/// Holder identity written into the lock key.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct LockToken(pub Uuid);

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl LockToken {
    /// Fresh, time-ordered token.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Proof of holding a lock. Must be handed back to [`HostLocks::release`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockGuard {
    /// Locked resource, e.g. a database host.
    pub resource: String,
    /// Store key holding the token.
    pub key: String,
    /// Token this holder wrote.
    pub token: LockToken,
    /// Expiry set on acquisition and on each renewal.
    pub ttl: Duration,
}

/// Result of [`HostLocks::acquire`].
#[derive(Debug)]
pub enum LockOutcome {
    /// The caller now holds the lock.
    Acquired(LockGuard),
    /// Someone else holds the lock. Not an error: skip the resource this round.
    Contended,
}

/// Per-resource locks with a shared expiry, keyed under `lock_prefix`.
#[derive(Clone)]
pub struct HostLocks {
    store: Arc<dyn SharedStore>,
    keys: KeyspaceConfig,
    ttl: Duration,
}

impl fmt::Debug for HostLocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostLocks")
            .field("lock_prefix", &self.keys.lock_prefix)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl HostLocks {
    /// Locks stored in `store` that expire after `ttl` unless renewed.
    pub fn new(store: Arc<dyn SharedStore>, keys: KeyspaceConfig, ttl: Duration) -> Self {
        Self { store, keys, ttl }
    }

    /// Expiry applied to every lock.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Try once to take the lock on `resource`. Never waits.
    pub async fn acquire(&self, resource: &str) -> Result<LockOutcome> {
        let key = self.keys.lock(resource);
        let token = LockToken::new();
        let acquired = self
            .store
            .set_if_absent(&key, &token.to_string(), self.ttl)
            .await?;

        if acquired {
            debug!(resource = %resource, token = %token, "lock acquired");
            Ok(LockOutcome::Acquired(LockGuard {
                resource: resource.to_string(),
                key,
                token,
                ttl: self.ttl,
            }))
        } else {
            debug!(resource = %resource, "lock held elsewhere");
            Ok(LockOutcome::Contended)
        }
    }

    /// Extend the expiry. `false` means the lock expired or changed hands.
    pub async fn renew(&self, guard: &LockGuard) -> Result<bool> {
        self.store
            .expire_if_equals(&guard.key, &guard.token.to_string(), guard.ttl)
            .await
    }

    /// Release the lock if we still own it. `false` means it had already
    /// expired or been taken over, which is logged but harmless.
    pub async fn release(&self, guard: LockGuard) -> Result<bool> {
        let released = self
            .store
            .delete_if_equals(&guard.key, &guard.token.to_string())
            .await?;
        if released {
            debug!(resource = %guard.resource, "lock released");
        } else {
            warn!(
                resource = %guard.resource,
                token = %guard.token,
                "lock was no longer held at release"
            );
        }
        Ok(released)
    }
}
