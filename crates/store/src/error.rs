use thiserror::Error;

/// Errors that can occur when interacting with the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A uniqueness constraint was violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A count would leave the representable range.
    #[error("Overflow: {0}")]
    Overflow(String),

    /// A persisted value could not be decoded into a domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// The store could not be reached or refused the unit of work.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true for failures a caller may retry with no partial effect:
    /// lock timeouts, serialization failures, deadlocks and lost connections.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(sqlx::Error::Database(db_err)) => matches!(
                db_err.code().as_deref(),
                // serialization_failure, deadlock_detected, lock_not_available,
                // query_canceled (statement/lock timeout)
                Some("40001" | "40P01" | "55P03" | "57014")
            ),
            StoreError::Database(
                sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Io(_)
                | sqlx::Error::Protocol(_),
            ) => true,
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
