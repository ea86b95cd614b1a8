//! Error taxonomy for vector-store operations.

use thiserror::Error;

/// Errors surfaced by the vector store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A vector's length does not match the store dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A vector or query has the wrong format for the operation.
    #[error("vector format mismatch: {0}")]
    FormatMismatch(String),

    /// The store's meta rows are missing; the database was never
    /// initialized for this store name or the file is foreign.
    #[error("store '{0}' is not initialized")]
    NotInitialized(String),

    /// The persisted schema was written by newer code.
    #[error("persisted schema version {persisted} is newer than declared version {declared}")]
    SchemaNewerThanCode { declared: u32, persisted: u32 },

    /// A migration hop failed; the prior schema is untouched.
    #[error("migration {from} -> {to} failed: {cause}")]
    MigrationFailed { from: u32, to: u32, cause: String },

    /// The record does not exist.
    #[error("record {0} not found")]
    NotFound(u64),

    /// An error from the KV backend or row codec, bubbled up unmodified.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<bincode::Error> for StoreError {
    fn from(e: bincode::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}
