//! Embedded vector store for the weft engine.
//!
//! A `VectorStore` is a named, persistent collection of vector records
//! inside one shared redb database:
//!
//! - versioned schema with online migrations run at open time
//! - dense (raw LE f32) and packed-binary (LSB-first) records side by side
//! - brute-force top-K with a bounded score heap, metadata predicates,
//!   and cosine / euclidean / hamming scoring
//! - a 256-entry popcount table with an optional accelerated module hook
//! - an optional in-memory mirror for query scans
//! - portable export/import dumps
//!
//! Brute force over every record is the contract; there is no ANN index.
//!
//! # Example
//!
//! ```no_run
//! use weft_store::{MigrationRegistry, Query, StoreConfig, StoreDb, VectorInput, VectorStore};
//!
//! # fn main() -> Result<(), weft_store::StoreError> {
//! let db = StoreDb::open("session.redb")?;
//! let config = StoreConfig::new("memories", 3).with_cache(true);
//! let store = VectorStore::open(db, config, &MigrationRegistry::new())?;
//!
//! let id = store.upsert(
//!     None,
//!     VectorInput::Dense(vec![0.1, 0.9, 0.0]),
//!     serde_json::Map::new(),
//! )?;
//!
//! let hits = store.query(Query::dense(vec![0.1, 0.8, 0.1], 5))?;
//! assert_eq!(hits.first().map(|h| h.id), Some(id));
//! # Ok(())
//! # }
//! ```

pub mod accel;
pub mod binary;
mod cache;
pub mod config;
mod db;
pub mod error;
pub mod migrate;
pub mod query;
pub mod record;
pub mod store;
mod tables;

pub use accel::{AccelError, PopcountModule, HAMMING_EXPORTS, PAGE_SIZE};
pub use binary::{hamming_fallback, pack_bits, BitSource};
pub use config::{Distance, SchemaFormat, SchemaMeta, StoreConfig, VectorFormat};
pub use db::StoreDb;
pub use error::StoreError;
pub use migrate::{MigrationCtx, MigrationRegistry};
pub use query::{MetaPredicate, Query, SearchHit};
pub use record::{VectorData, VectorInput, VectorRecord};
pub use store::{DumpRecord, DumpVector, StoreDump, VectorStore};
