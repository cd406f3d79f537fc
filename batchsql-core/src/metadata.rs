//! Lookup from a tenant's user name to its physical database.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::KeyspaceConfig;
use crate::error::{BatchError, Result};
use crate::model::UserDatabase;
use crate::store::SharedStore;

const DEFAULT_DB_PORT: u16 = 5432;

/// Resolves a user name to its physical database.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataBackend: Send + Sync {
    /// Resolve `user_name`, failing with [`BatchError::NotFound`] for unknown users.
    async fn resolve(&self, user_name: &str) -> Result<UserDatabase>;
}

/// Reads the per-user metadata hash (`<metadata_prefix><user>`) from the
/// shared store.
///
/// `database_host` and `database_name` are required. `database_user` defaults
/// to the user name, `database_password` to empty and `database_port` to 5432.
#[derive(Clone)]
pub struct StoreMetadataBackend {
    store: Arc<dyn SharedStore>,
    keys: KeyspaceConfig,
}

impl fmt::Debug for StoreMetadataBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreMetadataBackend")
            .field("prefix", &self.keys.metadata_prefix)
            .finish()
    }
}

impl StoreMetadataBackend {
    /// Backend reading hashes under `keys.metadata_prefix`.
    pub fn new(store: Arc<dyn SharedStore>, keys: KeyspaceConfig) -> Self {
        Self { store, keys }
    }
}

fn user_database_from_fields(
    user_name: &str,
    mut fields: HashMap<String, String>,
) -> Result<UserDatabase> {
    let mut required = |field: &str| {
        fields
            .remove(field)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| BatchError::InvalidMetadata {
                user: user_name.to_string(),
                reason: format!("missing {field}"),
            })
    };
    let db_host = required("database_host")?;
    let db_name = required("database_name")?;

    let db_port = match fields.remove("database_port") {
        Some(port) if !port.is_empty() => {
            port.parse::<u16>()
                .map_err(|e| BatchError::InvalidMetadata {
                    user: user_name.to_string(),
                    reason: format!("bad database_port '{port}': {e}"),
                })?
        }
        _ => DEFAULT_DB_PORT,
    };

    Ok(UserDatabase {
        user_name: user_name.to_string(),
        db_host,
        db_name,
        db_user: fields
            .remove("database_user")
            .filter(|user| !user.is_empty())
            .unwrap_or_else(|| user_name.to_string()),
        db_password: fields.remove("database_password").unwrap_or_default(),
        db_port,
    })
}

#[async_trait]
impl MetadataBackend for StoreMetadataBackend {
    async fn resolve(&self, user_name: &str) -> Result<UserDatabase> {
        let fields = self
            .store
            .hash_get_all(&self.keys.metadata(user_name))
            .await?;
        if fields.is_empty() {
            return Err(BatchError::NotFound(format!("user {user_name}")));
        }
        user_database_from_fields(user_name, fields)
    }
}

/// Fixed user table, for local runs and tests.
#[derive(Clone, Debug, Default)]
pub struct StaticMetadataBackend {
    users: Arc<RwLock<HashMap<String, UserDatabase>>>,
}

impl StaticMetadataBackend {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user's database.
    pub async fn insert(&self, database: UserDatabase) {
        self.users
            .write()
            .await
            .insert(database.user_name.clone(), database);
    }

    /// Forget a user.
    pub async fn remove(&self, user_name: &str) -> Option<UserDatabase> {
        self.users.write().await.remove(user_name)
    }
}

#[async_trait]
impl MetadataBackend for StaticMetadataBackend {
    async fn resolve(&self, user_name: &str) -> Result<UserDatabase> {
        self.users
            .read()
            .await
            .get(user_name)
            .cloned()
            .ok_or_else(|| BatchError::NotFound(format!("user {user_name}")))
    }
}
