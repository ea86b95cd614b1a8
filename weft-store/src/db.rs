//! The shared redb database behind one session's named stores.

use crate::error::StoreError;
use redb::{Database, ReadTransaction, ReadableDatabase, WriteTransaction};
use std::path::Path;
use std::sync::Arc;

/// A handle to the embedded KV database.
///
/// One `StoreDb` backs every named store of a session. Writes are
/// serialized by redb's single-writer transaction; readers coexist with
/// the writer on their own snapshots.
pub struct StoreDb {
    db: Database,
}

impl StoreDb {
    /// Open or create a database file.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>, StoreError> {
        let db = Database::create(path)?;
        Ok(Arc::new(Self { db }))
    }

    /// Create an in-memory database. Contents are lost on drop; intended
    /// for tests and ephemeral sessions.
    pub fn in_memory() -> Result<Arc<Self>, StoreError> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Arc::new(Self { db }))
    }

    pub(crate) fn begin_write(&self) -> Result<WriteTransaction, StoreError> {
        Ok(self.db.begin_write()?)
    }

    pub(crate) fn begin_read(&self) -> Result<ReadTransaction, StoreError> {
        Ok(self.db.begin_read()?)
    }
}
