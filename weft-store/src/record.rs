//! Record rows and their on-disk codec.

use crate::config::VectorFormat;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A record as seen by callers.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    /// Store-assigned (or caller-supplied) id, stable for the record's
    /// lifetime.
    pub id: u64,
    pub format: VectorFormat,
    pub vector: VectorData,
    /// Opaque attribute map; the store only reads it for predicates and
    /// configured indexes.
    pub meta: Map<String, Value>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Decoded vector payload.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorData {
    Dense(Vec<f32>),
    Binary(Vec<u8>),
}

/// A vector supplied by a caller, for insertion or as a query.
#[derive(Debug, Clone)]
pub enum VectorInput {
    /// Float sequence of exactly the store dimension.
    Dense(Vec<f32>),
    /// Any bit source; packed against the store dimension.
    Binary(crate::binary::BitSource),
}

impl VectorData {
    pub fn format(&self) -> VectorFormat {
        match self {
            VectorData::Dense(_) => VectorFormat::Dense,
            VectorData::Binary(_) => VectorFormat::Binary,
        }
    }
}

/// The bincode row stored under the record's id key.
///
/// Dense vectors are raw little-endian f32 bytes; binary vectors are
/// packed LSB-first bytes. Meta travels as a JSON string so the row codec
/// stays fixed-shape.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredRow {
    pub format: VectorFormat,
    pub vector: Vec<u8>,
    pub meta: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl StoredRow {
    pub fn encode(&self) -> Result<Vec<u8>, StoreError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, StoreError> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn meta_map(&self) -> Result<Map<String, Value>, StoreError> {
        if self.meta.is_empty() {
            return Ok(Map::new());
        }
        Ok(serde_json::from_str(&self.meta)?)
    }

    pub fn into_record(self, id: u64) -> Result<VectorRecord, StoreError> {
        let meta = self.meta_map()?;
        let vector = match self.format {
            VectorFormat::Dense => VectorData::Dense(floats_from_le(&self.vector)?),
            VectorFormat::Binary => VectorData::Binary(self.vector),
        };
        Ok(VectorRecord {
            id,
            format: self.format,
            vector,
            meta,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
        })
    }
}

/// Serialize a float sequence as raw little-endian bytes.
pub(crate) fn floats_to_le(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode raw little-endian bytes back into floats.
pub(crate) fn floats_from_le(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::Backend(format!(
            "dense vector byte length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

/// L2 norm of a float sequence.
pub(crate) fn l2_norm(values: &[f32]) -> f32 {
    values.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_bytes_round_trip() {
        let values = vec![0.25f32, -1.5, 3.75, f32::MIN_POSITIVE];
        let bytes = floats_to_le(&values);
        assert_eq!(floats_from_le(&bytes).unwrap(), values);
    }

    #[test]
    fn row_round_trips_through_bincode() {
        let row = StoredRow {
            format: VectorFormat::Dense,
            vector: floats_to_le(&[1.0, 0.0]),
            meta: r#"{"kind":"memory"}"#.to_string(),
            created_at_ms: 1,
            updated_at_ms: 2,
        };
        let decoded = StoredRow::decode(&row.encode().unwrap()).unwrap();
        let record = decoded.into_record(7).unwrap();
        assert_eq!(record.id, 7);
        assert_eq!(record.vector, VectorData::Dense(vec![1.0, 0.0]));
        assert_eq!(record.meta["kind"], "memory");
    }

    #[test]
    fn misaligned_dense_bytes_are_rejected() {
        assert!(floats_from_le(&[0u8; 6]).is_err());
    }
}
