//! Bit packing and Hamming distance for binary vectors.
//!
//! Bit `i` of a vector lands in byte `i / 8` at bit index `i % 8`,
//! LSB-first. Distances go through a 256-entry popcount table; the
//! accelerated module path in [`crate::accel`] must agree bit-for-bit.

use crate::error::StoreError;

/// A source of bits for a binary vector.
#[derive(Debug, Clone)]
pub enum BitSource {
    /// One bool per bit.
    Bools(Vec<bool>),
    /// One 0/1 integer per bit; any nonzero value counts as set.
    Ints(Vec<u8>),
    /// Already packed, LSB-first. Must cover the store dimension.
    Packed(Vec<u8>),
}

/// Pack a bit source into LSB-first bytes for a store of `dimension` bits.
pub fn pack_bits(source: &BitSource, dimension: usize) -> Result<Vec<u8>, StoreError> {
    let byte_len = dimension.div_ceil(8);
    match source {
        BitSource::Bools(bits) => {
            if bits.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    got: bits.len(),
                });
            }
            let mut packed = vec![0u8; byte_len];
            for (i, bit) in bits.iter().enumerate() {
                if *bit {
                    packed[i / 8] |= 1 << (i % 8);
                }
            }
            Ok(packed)
        }
        BitSource::Ints(bits) => {
            if bits.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    got: bits.len(),
                });
            }
            let mut packed = vec![0u8; byte_len];
            for (i, bit) in bits.iter().enumerate() {
                if *bit != 0 {
                    packed[i / 8] |= 1 << (i % 8);
                }
            }
            Ok(packed)
        }
        BitSource::Packed(bytes) => {
            if bytes.len() * 8 < dimension {
                return Err(StoreError::DimensionMismatch {
                    expected: dimension,
                    got: bytes.len() * 8,
                });
            }
            Ok(bytes.clone())
        }
    }
}

/// Popcount lookup table, one entry per byte value.
pub(crate) const POPCOUNT: [u8; 256] = build_popcount_table();

const fn build_popcount_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        table[i] = (i as u8).count_ones() as u8;
        i += 1;
    }
    table
}

/// Table-driven Hamming distance over packed vectors.
///
/// Trailing bytes of the longer input are compared against zero, so
/// pre-packed vectors with slack bytes still produce stable distances.
pub fn hamming_fallback(a: &[u8], b: &[u8]) -> u32 {
    let common = a.len().min(b.len());
    let mut distance = 0u32;
    for i in 0..common {
        distance += POPCOUNT[(a[i] ^ b[i]) as usize] as u32;
    }
    for &byte in &a[common..] {
        distance += POPCOUNT[byte as usize] as u32;
    }
    for &byte in &b[common..] {
        distance += POPCOUNT[byte as usize] as u32;
    }
    distance
}
