use thiserror::Error;

/// Errors raised by the scheduling core.
#[derive(Error, Debug)]
pub enum BatchError {
    /// Network or server hiccup talking to the shared store. The current cycle is skipped.
    #[error("Shared store error: {0}")]
    Store(String),

    /// Metadata or job-owner lookup miss. Only the affected entry is dropped.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Metadata record present but unusable.
    #[error("Invalid metadata for user {user}: {reason}")]
    InvalidMetadata {
        /// User whose record was read.
        user: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Job storage failure.
    #[cfg(feature = "database")]
    #[error("Job storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invariant violation or refused operation.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BatchError {
    /// Whether the error means the looked-up record does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            BatchError::NotFound(_) => true,
            #[cfg(feature = "database")]
            BatchError::Storage(sqlx::Error::RowNotFound) => true,
            _ => false,
        }
    }

    /// Errors worth retrying on the next tick rather than dropping work for.
    pub fn is_transient(&self) -> bool {
        match self {
            BatchError::Store(_) => true,
            #[cfg(feature = "database")]
            BatchError::Storage(err) => matches!(
                err,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            _ => false,
        }
    }
}

#[cfg(feature = "database")]
impl From<redis::RedisError> for BatchError {
    fn from(err: redis::RedisError) -> Self {
        BatchError::Store(err.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BatchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_taxonomy() {
        assert!(BatchError::Store("connection reset".into()).is_transient());
        assert!(!BatchError::Store("connection reset".into()).is_not_found());
        assert!(BatchError::NotFound("user u1".into()).is_not_found());
        assert!(!BatchError::Internal("boom".into()).is_transient());
    }
}
