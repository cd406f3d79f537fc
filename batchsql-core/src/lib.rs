//! # BatchSQL Core
//!
//! Scheduling core for multi-tenant batch SQL jobs: decides which tenant
//! database gets to run its next job, keeps the shared queues, and migrates
//! the legacy host-keyed queues into the per-user layout.
//!
//! ## Overview
//!
//! Several worker processes run the same loop against one shared store:
//!
//! - **User-Database Queue**: FIFO of user names with work ready ([`queue`])
//! - **Host Admission**: per-host in-flight counter gating dispatch ([`admission`])
//! - **Capacity Probe**: per-host core count feeding admission limits, failing open ([`capacity`])
//! - **Dequeuers**: admit a database, then take its next queued job id, or its
//!   oldest pending job once that list is empty ([`dequeue`])
//! - **Launcher**: periodic dispatch cycle that logs and keeps going on failure ([`launcher`])
//! - **Queue Migrator**: lock-protected drain of legacy host queues ([`migrate`], [`lock`])
//!
//! ## Feature Flags
//!
//! - `database` (default): Redis [`store::RedisStore`] and Postgres
//!   [`jobs::PostgresJobStorage`]. Without it only [`store::MemoryStore`] is
//!   available.
//!
//! ## Examples
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use batchsql_core::{
//!     HostAdmission, KeyspaceConfig, MemoryStore, StaticMetadataBackend, UserDatabaseQueue,
//!     dequeue::DatabaseDequeuer,
//! };
//!
//! async fn admit_one() -> batchsql_core::Result<()> {
//!     let store = Arc::new(MemoryStore::new());
//!     let queue = UserDatabaseQueue::new(store, &KeyspaceConfig::default());
//!     queue.enqueue("alice").await?;
//!
//!     let dequeuer = DatabaseDequeuer::new(
//!         queue,
//!         Arc::new(StaticMetadataBackend::new()),
//!         HostAdmission::new(2),
//!     );
//!     if let Some(database) = dequeuer.next().await? {
//!         println!("admitted {} on {}", database.user_name, database.db_host);
//!     }
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod capacity;
/// Serde configuration structs with defaults.
pub mod config;
pub mod dequeue;
pub mod dispatch;
/// Error taxonomy and result alias.
pub mod error;
pub mod jobs;
/// Timer driving the dispatch cycle.
pub mod launcher;
pub mod lock;
pub mod metadata;
pub mod migrate;
/// Tenant databases, jobs and dispatch records.
pub mod model;
pub mod queue;
pub mod store;

pub use admission::{HostAdmission, HostUtilization};
pub use capacity::{
    CapacityProbe, CapacityRefresher, FAIL_OPEN_CAPACITY, FixedCapacity, HttpCapacityProbe,
};
pub use config::{
    BatchConfig, CapacityConfig, DEFAULT_BATCH_INTERVAL, KeyspaceConfig, MigrationConfig,
    SchedulerConfig,
};
pub use dispatch::{CycleOutcome, DispatchCycle, Dispatcher, ExecutionHandoff};
pub use error::{BatchError, Result};
pub use jobs::{JobOwnerLookup, JobStorage};
pub use launcher::Launcher;
pub use lock::{HostLocks, LockGuard, LockOutcome, LockToken};
pub use metadata::{MetadataBackend, StaticMetadataBackend, StoreMetadataBackend};
pub use migrate::{HostMigration, HostOutcome, MigrationReport, QueueMigrator};
pub use model::{Dispatch, HostCapacitySample, Job, JobId, JobStatus, UserDatabase};
pub use queue::{LegacyQueueStream, UserDatabaseQueue, UserJobQueue};
pub use store::{MemoryStore, ScanPage, SharedStore};
