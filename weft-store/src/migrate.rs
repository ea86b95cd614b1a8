//! Online schema migrations.
//!
//! Migrations are registered per store config as consecutive hops
//! `(from, from + 1)`. Opening a store persisted at a lower version than
//! declared runs every hop in ascending order inside the one upgrade
//! write transaction that also owns the meta-record updates; a missing
//! hop is logged and skipped, but the final persisted version is the
//! declared one either way.

use crate::config::SchemaMeta;
use crate::error::StoreError;
use crate::record::StoredRow;
use crate::tables::{index_key, index_table, TableNames};
use redb::{ReadableTable, WriteTransaction};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

type MigrationFn = Box<dyn Fn(&mut MigrationCtx<'_>) -> Result<(), StoreError> + Send + Sync>;

/// Registered migration hops for one store config.
///
/// Deliberately not process-global: each store constructor receives the
/// registry it should honor.
#[derive(Default)]
pub struct MigrationRegistry {
    hops: BTreeMap<u32, MigrationFn>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the hop `from -> from + 1`. Re-registering a hop
    /// replaces it.
    pub fn register<F>(&mut self, from: u32, hop: F)
    where
        F: Fn(&mut MigrationCtx<'_>) -> Result<(), StoreError> + Send + Sync + 'static,
    {
        self.hops.insert(from, Box::new(hop));
    }

    pub(crate) fn get(&self, from: u32) -> Option<&MigrationFn> {
        self.hops.get(&from)
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

/// What a migration hop may do, scoped to the upgrade transaction.
pub struct MigrationCtx<'a> {
    pub(crate) txn: &'a WriteTransaction,
    pub(crate) tables: &'a TableNames,
    pub(crate) schema: &'a mut SchemaMeta,
}

impl MigrationCtx<'_> {
    /// The schema as of this hop (version still the hop's `from`).
    pub fn schema(&self) -> &SchemaMeta {
        self.schema
    }

    /// Create a non-unique secondary index over `meta.<field>` and
    /// backfill it from every existing record. Idempotent.
    pub fn add_index(&mut self, field: &str) -> Result<(), StoreError> {
        if self.schema.indexes.iter().any(|f| f == field) {
            return Ok(());
        }

        let index_name = self.tables.index_name(field);
        let mut index = self.txn.open_multimap_table(index_table(&index_name))?;
        let records = self.txn.open_table(self.tables.records())?;

        for entry in records.iter()? {
            let (key, value) = entry?;
            let row = StoredRow::decode(value.value())?;
            let meta = row.meta_map()?;
            if let Some(field_value) = meta.get(field) {
                index.insert(index_key(field_value).as_str(), key.value())?;
            }
        }

        self.schema.indexes.push(field.to_string());
        tracing::debug!(field, "created secondary index");
        Ok(())
    }

    /// Drop the secondary index over `meta.<field>`. Idempotent.
    pub fn remove_index(&mut self, field: &str) -> Result<(), StoreError> {
        let Some(position) = self.schema.indexes.iter().position(|f| f == field) else {
            return Ok(());
        };

        let index_name = self.tables.index_name(field);
        self.txn
            .delete_multimap_table(index_table(&index_name))
            .map_err(StoreError::from)?;
        self.schema.indexes.remove(position);
        tracing::debug!(field, "dropped secondary index");
        Ok(())
    }

    /// Rewrite every record's meta map. The closure returns `true` when
    /// it changed the map; changed records are re-written and their
    /// index entries maintained. Returns the number of rewritten
    /// records.
    pub fn transform_meta<F>(&mut self, mut transform: F) -> Result<u64, StoreError>
    where
        F: FnMut(u64, &mut Map<String, Value>) -> bool,
    {
        // Collect first: the records table cannot be mutated mid-scan.
        let mut pending: Vec<(u64, StoredRow, Map<String, Value>, Map<String, Value>)> = Vec::new();
        {
            let records = self.txn.open_table(self.tables.records())?;
            for entry in records.iter()? {
                let (key, value) = entry?;
                let id = key.value();
                let row = StoredRow::decode(value.value())?;
                let old_meta = row.meta_map()?;
                let mut new_meta = old_meta.clone();
                if transform(id, &mut new_meta) {
                    pending.push((id, row, old_meta, new_meta));
                }
            }
        }

        let rewritten = pending.len() as u64;
        let mut records = self.txn.open_table(self.tables.records())?;
        for (id, mut row, old_meta, new_meta) in pending {
            for field in &self.schema.indexes {
                let old_value = old_meta.get(field);
                let new_value = new_meta.get(field);
                if old_value == new_value {
                    continue;
                }
                let index_name = self.tables.index_name(field);
                let mut index = self.txn.open_multimap_table(index_table(&index_name))?;
                if let Some(v) = old_value {
                    index.remove(index_key(v).as_str(), id)?;
                }
                if let Some(v) = new_value {
                    index.insert(index_key(v).as_str(), id)?;
                }
            }
            row.meta = serde_json::to_string(&new_meta)?;
            let encoded = row.encode()?;
            records.insert(id, encoded.as_slice())?;
        }

        Ok(rewritten)
    }
}
