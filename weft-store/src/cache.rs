//! The optional in-memory mirror of a store's records.

use crate::config::VectorFormat;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One mirrored record: id, raw vector bytes, format, meta.
#[derive(Debug, Clone)]
pub(crate) struct CachedRecord {
    pub format: VectorFormat,
    pub vector: Vec<u8>,
    pub meta: Map<String, Value>,
}

/// The mirror itself. Keyed by id so scans run in id order, matching the
/// store cursor.
#[derive(Debug, Default)]
pub(crate) struct Mirror {
    pub records: BTreeMap<u64, CachedRecord>,
}

impl Mirror {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn insert(&mut self, id: u64, record: CachedRecord) {
        self.records.insert(id, record);
    }

    pub fn remove(&mut self, id: u64) {
        self.records.remove(&id);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
