//! Dispatch-side dequeuers: pick an admitted database, then its next queued job.

/// Pops users and admits their database host.
pub mod database;
/// Turns an admitted database into a runnable job.
pub mod job;

pub use database::DatabaseDequeuer;
pub use job::JobDequeuer;
