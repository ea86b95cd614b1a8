//! Table naming and definitions for one named store.

use redb::{MultimapTableDefinition, TableDefinition};

/// Meta-table key for the schema row.
pub(crate) const SCHEMA_KEY: &str = "schema";
/// Meta-table key for the migrations log row.
pub(crate) const MIGRATIONS_KEY: &str = "migrations";
/// Meta-table key for the id counter.
pub(crate) const NEXT_ID_KEY: &str = "next_id";

/// Fully-qualified table names of a named store inside the shared
/// database.
#[derive(Debug, Clone)]
pub(crate) struct TableNames {
    meta: String,
    records: String,
    index_prefix: String,
}

impl TableNames {
    pub fn new(store_name: &str) -> Self {
        Self {
            meta: format!("{store_name}.meta"),
            records: format!("{store_name}.records"),
            index_prefix: format!("{store_name}.idx."),
        }
    }

    /// `&str -> &[u8]` table holding the schema, migrations, and counter
    /// rows.
    pub fn meta(&self) -> TableDefinition<'_, &'static str, &'static [u8]> {
        TableDefinition::new(&self.meta)
    }

    /// `u64 -> &[u8]` table holding one bincode row per record.
    pub fn records(&self) -> TableDefinition<'_, u64, &'static [u8]> {
        TableDefinition::new(&self.records)
    }

    /// Non-unique secondary index over one meta field.
    pub fn index_name(&self, field: &str) -> String {
        format!("{}{}", self.index_prefix, field)
    }
}

/// Definition for a secondary-index multimap table.
pub(crate) fn index_table(name: &str) -> MultimapTableDefinition<'_, &'static str, u64> {
    MultimapTableDefinition::new(name)
}

/// The string key a meta value indexes under. Strings index as-is;
/// everything else by its JSON rendering.
pub(crate) fn index_key(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
