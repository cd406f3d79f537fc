//! Queues kept in the shared store.

/// Pull stream over a legacy host queue.
pub mod legacy_stream;
/// User-Database Queue and per-user job queues.
pub mod user_database;

pub use legacy_stream::LegacyQueueStream;
pub use user_database::{UserDatabaseQueue, UserJobQueue};
