//! Store configuration and schema metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a vector is laid out on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorFormat {
    /// Raw little-endian f32 sequence of the store dimension.
    Dense,
    /// Bit-packed bytes, LSB-first, at least `ceil(dimension / 8)` long.
    Binary,
}

impl fmt::Display for VectorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VectorFormat::Dense => write!(f, "dense"),
            VectorFormat::Binary => write!(f, "binary"),
        }
    }
}

/// Distance metric for top-K queries.
///
/// `Euclidean` on a `normalize = true` store is permitted: on unit vectors
/// it ranks identically to cosine (a monotone transform). On a store
/// holding un-normalized records the ranking is the caller's business;
/// the store computes exactly what was asked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    /// Score is `dot(q, v)`; the query is normalized first when the
    /// store is configured with `normalize = true`.
    Cosine,
    /// Score is `-||q - v||₂`, so higher is better like the others.
    Euclidean,
    /// Popcount of byte-wise XOR over packed binary vectors; score is
    /// the negated distance.
    Hamming,
}

/// Configuration for opening a named vector store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store name; scopes every table in the backing database.
    pub name: String,
    /// Declared schema version (>= 1). Opening a store persisted at a
    /// lower version runs every registered migration hop in between.
    pub schema_version: u32,
    /// Fixed vector dimension (> 0).
    pub dimension: usize,
    /// Primary vector format. Individual records may still carry the
    /// other format; this drives schema metadata and normalization.
    pub format: VectorFormat,
    /// L2-normalize dense vectors on insert and cosine queries.
    /// Forced off for binary stores.
    pub normalize: bool,
    /// Meta field that carries a caller-supplied record id.
    pub id_field: String,
    /// Meta fields to maintain non-unique secondary indexes over.
    pub meta_indexes: Vec<String>,
    /// Keep an in-memory mirror of every record for query scans.
    pub cache: bool,
    /// Emit per-record debug logs.
    pub verbose: bool,
}

impl StoreConfig {
    /// Create a dense store config with sane defaults.
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            schema_version: 1,
            dimension,
            format: VectorFormat::Dense,
            normalize: true,
            id_field: "id".to_string(),
            meta_indexes: Vec::new(),
            cache: false,
            verbose: false,
        }
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version.max(1);
        self
    }

    pub fn with_format(mut self, format: VectorFormat) -> Self {
        self.format = format;
        if format == VectorFormat::Binary {
            self.normalize = false;
        }
        self
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize && self.format != VectorFormat::Binary;
        self
    }

    pub fn with_id_field(mut self, field: impl Into<String>) -> Self {
        self.id_field = field.into();
        self
    }

    pub fn with_meta_index(mut self, field: impl Into<String>) -> Self {
        self.meta_indexes.push(field.into());
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Bytes needed to pack one binary vector of this dimension.
    pub fn packed_len(&self) -> usize {
        self.dimension.div_ceil(8)
    }
}

/// Declared format of a whole store, as persisted in the schema row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaFormat {
    Dense,
    Binary,
    /// Records of both formats are present (set by imports).
    Mixed,
}

impl From<VectorFormat> for SchemaFormat {
    fn from(f: VectorFormat) -> Self {
        match f {
            VectorFormat::Dense => SchemaFormat::Dense,
            VectorFormat::Binary => SchemaFormat::Binary,
        }
    }
}

/// The single persisted `schema` row of a named store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMeta {
    pub version: u32,
    pub dimension: usize,
    pub format: SchemaFormat,
    pub normalize: bool,
    /// Meta fields with live secondary indexes.
    pub indexes: Vec<String>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_forces_normalize_off() {
        let config = StoreConfig::new("test", 256)
            .with_format(VectorFormat::Binary)
            .with_normalize(true);
        assert!(!config.normalize);
    }

    #[test]
    fn packed_len_rounds_up() {
        assert_eq!(StoreConfig::new("a", 8).packed_len(), 1);
        assert_eq!(StoreConfig::new("b", 9).packed_len(), 2);
        assert_eq!(StoreConfig::new("c", 256).packed_len(), 32);
    }
}
