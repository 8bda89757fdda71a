use thiserror::Error;

/// Errors that can arise inside the storage layer. They never leave the
/// background jobs: callers see them only as text inside a `PersistOutcome`.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around PostgreSQL client errors (connect and statement failures).
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Wrapper around IO errors (directory creation, dead-letter file, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Every pooled connection stayed busy for the whole acquire timeout.
    #[error("connection pool exhausted after waiting {waited_ms}ms (max_size={max_size})")]
    PoolExhausted { max_size: usize, waited_ms: u64 },

    /// The pool was shut down while a caller waited for a connection.
    #[error("connection pool closed")]
    PoolClosed,

    /// Schema bootstrap has not completed yet.
    #[error("storage backend is not ready")]
    NotReady,

    /// A keep-alive probe failed.
    #[error("keep-alive probe failed: {0}")]
    Probe(String),

    /// A stored row could not be turned back into its in-memory form.
    #[error("malformed {entity} row {id}: {reason}")]
    MalformedRow {
        entity: &'static str,
        id: String,
        reason: String,
    },

    /// Internal error (task join errors, unexpected conditions)
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Internal(format!("background task failed: {err}"))
    }
}
