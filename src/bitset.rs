//! Packed selection bitsets and their transport encoding.
//!
//! Wire contract shared with every stored subdivision and every client:
//!
//! - cell `(r, c)` has id `i = r * cols + c`
//! - cell `i` lives in byte `i / 8`, bit `i % 8`, bit 0 being the least significant
//! - length is `ceil(rows * cols / 8)` bytes, unused trailing bits are zero
//! - text form is `base64(zlib(bytes))`, standard alphabet with padding

use std::fmt;
use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::{LakeGridError, Result};
use crate::grid::SelectionMask;

/// Encoding identifier attached to every encoded payload.
pub const ENCODING: &str = "bitset+zlib+base64";
/// Bit order identifier.
pub const BIT_ORDER: &str = "lsb0";
/// Cell numbering identifier.
pub const CELL_ORDER: &str = "row_major_cell_id";

/// Raw packed bitset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Bitset {
    bytes: Vec<u8>,
}

impl Bitset {
    /// Wrap already-packed bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// All-zero bitset for `cells` cells.
    #[must_use]
    pub fn zeroed(cells: usize) -> Self {
        Self {
            bytes: vec![0; Self::byte_len(cells)],
        }
    }

    /// Packed length of `cells` cells.
    #[inline]
    #[must_use]
    pub const fn byte_len(cells: usize) -> usize {
        cells.div_ceil(8)
    }

    /// Pack a mask row-major, LSB0.
    #[must_use]
    pub fn pack(mask: &SelectionMask) -> Self {
        let mut bytes = vec![0u8; Self::byte_len(mask.cells().len())];
        for (i, _) in mask.cells().iter().enumerate().filter(|(_, c)| **c) {
            bytes[i / 8] |= 1 << (i % 8);
        }
        Self { bytes }
    }

    /// Unpack into a `rows x cols` mask, ignoring padding bits.
    ///
    /// The buffer must be exactly `ceil(rows * cols / 8)` bytes. Longer buffers
    /// are rejected, not truncated to the grid.
    ///
    /// # Errors
    /// `BitsetDimensionMismatch` for any other length.
    pub fn unpack(&self, rows: usize, cols: usize) -> Result<SelectionMask> {
        let cells = rows * cols;
        self.expect_len(Self::byte_len(cells))?;
        let bits = (0..cells).map(|i| self.bit(i)).collect();
        SelectionMask::from_cells(rows, cols, bits)
    }

    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// State of cell `i`; cells past the end read as unset.
    #[inline]
    #[must_use]
    pub fn get(&self, i: usize) -> bool {
        self.bytes.get(i / 8).is_some_and(|b| b & (1 << (i % 8)) != 0)
    }

    #[inline]
    fn bit(&self, i: usize) -> bool {
        self.bytes[i / 8] & (1 << (i % 8)) != 0
    }

    /// True if a bit at or beyond cell `cells` is set in the final byte.
    #[must_use]
    pub fn has_padding_bits(&self, cells: usize) -> bool {
        let used = cells % 8;
        if used == 0 {
            return false;
        }
        self.bytes
            .get(cells / 8)
            .is_some_and(|&last| last & !((1u8 << used) - 1) != 0)
    }

    /// Number of set cells.
    #[must_use]
    pub fn count_ones(&self) -> usize {
        self.bytes.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// True if at least one cell is set.
    #[must_use]
    pub fn any(&self) -> bool {
        self.bytes.iter().any(|&b| b != 0)
    }

    /// True if any cell is set in both.
    ///
    /// # Errors
    /// `BitsetDimensionMismatch` for different lengths.
    pub fn intersects(&self, other: &Self) -> Result<bool> {
        self.expect_len(other.len())?;
        Ok(self.bytes.iter().zip(&other.bytes).any(|(a, b)| a & b != 0))
    }

    /// Bitwise AND.
    ///
    /// # Errors
    /// `BitsetDimensionMismatch` for different lengths.
    pub fn intersection(&self, other: &Self) -> Result<Self> {
        self.expect_len(other.len())?;
        Ok(Self {
            bytes: self.bytes.iter().zip(&other.bytes).map(|(a, b)| a & b).collect(),
        })
    }

    /// Bitwise OR.
    ///
    /// # Errors
    /// `BitsetDimensionMismatch` for different lengths.
    pub fn union(&self, other: &Self) -> Result<Self> {
        let mut out = self.clone();
        out.union_in_place(other)?;
        Ok(out)
    }

    /// Bitwise OR into `self`.
    ///
    /// # Errors
    /// `BitsetDimensionMismatch` for different lengths; `self` is unchanged.
    pub fn union_in_place(&mut self, other: &Self) -> Result<()> {
        self.expect_len(other.len())?;
        for (a, b) in self.bytes.iter_mut().zip(&other.bytes) {
            *a |= b;
        }
        Ok(())
    }

    /// Compress and base64-encode.
    ///
    /// # Errors
    /// `Codec` if the compressor fails.
    pub fn encode(&self, level: u32) -> Result<EncodedBitset> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level.min(9)));
        encoder
            .write_all(&self.bytes)
            .map_err(|e| LakeGridError::Codec(format!("compression write error: {e}")))?;
        let compressed = encoder
            .finish()
            .map_err(|e| LakeGridError::Codec(format!("compression finish error: {e}")))?;
        Ok(EncodedBitset(STANDARD.encode(compressed)))
    }

    fn expect_len(&self, expected: usize) -> Result<()> {
        if self.bytes.len() == expected {
            Ok(())
        } else {
            Err(LakeGridError::BitsetDimensionMismatch {
                left: self.bytes.len(),
                right: expected,
            })
        }
    }
}

impl From<&SelectionMask> for Bitset {
    fn from(mask: &SelectionMask) -> Self {
        Self::pack(mask)
    }
}

/// Base64 text of a zlib-compressed [`Bitset`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncodedBitset(String);

impl EncodedBitset {
    /// Wrap received text; validity is checked on [`EncodedBitset::decode`].
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Decode back to the packed bytes.
    ///
    /// # Errors
    /// `Codec` for invalid base64 or a corrupt zlib stream.
    pub fn decode(&self) -> Result<Bitset> {
        let compressed = STANDARD
            .decode(self.0.as_bytes())
            .map_err(|e| LakeGridError::Codec(format!("base64 decode error: {e}")))?;
        let mut bytes = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .read_to_end(&mut bytes)
            .map_err(|e| LakeGridError::Codec(format!("decompression error: {e}")))?;
        Ok(Bitset::from_bytes(bytes))
    }
}

impl fmt::Display for EncodedBitset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pack and encode a mask in one step.
///
/// # Errors
/// `Codec` if the compressor fails.
pub fn mask_to_encoded_bitset(mask: &SelectionMask, level: u32) -> Result<EncodedBitset> {
    Bitset::pack(mask).encode(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mask_with(rows: usize, cols: usize, selected: &[usize]) -> SelectionMask {
        let mut cells = vec![false; rows * cols];
        for &i in selected {
            cells[i] = true;
        }
        SelectionMask::from_cells(rows, cols, cells).unwrap()
    }

    #[test]
    fn test_first_cell_is_lsb() {
        let b = Bitset::pack(&mask_with(1, 8, &[0]));
        assert_eq!(b.as_bytes(), &[0x01]);
    }

    #[test]
    fn test_ninth_cell_starts_second_byte() {
        let b = Bitset::pack(&mask_with(1, 9, &[8]));
        assert_eq!(b.as_bytes(), &[0x00, 0x01]);
    }

    #[test]
    fn test_row_major_order() {
        // 3x3: cell (1, 2) has id 5, cell (2, 0) has id 6
        let b = Bitset::pack(&mask_with(3, 3, &[5, 6]));
        assert_eq!(b.as_bytes(), &[0b0110_0000, 0x00]);
        assert!(b.get(5) && b.get(6) && !b.get(7));
    }

    #[test]
    fn test_byte_len() {
        assert_eq!(Bitset::byte_len(0), 0);
        assert_eq!(Bitset::byte_len(1), 1);
        assert_eq!(Bitset::byte_len(8), 1);
        assert_eq!(Bitset::byte_len(9), 2);
        assert_eq!(Bitset::pack(&SelectionMask::new(0, 5)).len(), 0);
        assert_eq!(Bitset::pack(&SelectionMask::new(7, 3)).len(), 3);
    }

    #[test]
    fn test_unpack_ignores_padding() {
        // 3 cells, stray bits above bit 2 are not cells
        let m = Bitset::from_bytes(vec![0b1111_1010]).unpack(1, 3).unwrap();
        assert_eq!(m.cells(), &[false, true, false]);
    }

    #[test]
    fn test_unpack_rejects_wrong_length() {
        let err = Bitset::from_bytes(vec![0; 3]).unpack(3, 3).unwrap_err();
        assert_eq!(err.code(), "BITSET_DIMENSION_MISMATCH");
        // One byte too short and one too long
        assert!(Bitset::from_bytes(vec![0; 1]).unpack(3, 3).is_err());
        assert!(Bitset::from_bytes(vec![0xFF; 2]).unpack(2, 4).is_err());
    }

    #[test]
    fn test_padding_bits() {
        // 9 cells: byte 1 holds cell 8 in bit 0, bits 1..8 are padding
        assert!(!Bitset::from_bytes(vec![0xFF, 0b0000_0001]).has_padding_bits(9));
        assert!(Bitset::from_bytes(vec![0x00, 0b0000_0010]).has_padding_bits(9));
        assert!(Bitset::from_bytes(vec![0x00, 0b1000_0000]).has_padding_bits(9));
        // Whole bytes have no padding
        assert!(!Bitset::from_bytes(vec![0xFF, 0xFF]).has_padding_bits(16));
    }

    #[test]
    fn test_set_algebra() {
        let a = Bitset::from_bytes(vec![0b0000_1111, 0x00]);
        let b = Bitset::from_bytes(vec![0b0011_0000, 0x01]);
        let c = Bitset::from_bytes(vec![0b0000_1000, 0x00]);
        assert!(!a.intersects(&b).unwrap());
        assert!(a.intersects(&c).unwrap());
        assert_eq!(a.union(&b).unwrap().as_bytes(), &[0b0011_1111, 0x01]);
        assert_eq!(a.intersection(&c).unwrap(), c);
        assert_eq!(a.union(&a).unwrap(), a);
        assert_eq!(a.union(&b).unwrap().count_ones(), 7);
    }

    #[test]
    fn test_set_algebra_rejects_mismatched_lengths() {
        let mut a = Bitset::zeroed(16);
        let b = Bitset::zeroed(17);
        assert!(a.intersects(&b).is_err());
        assert!(a.union_in_place(&b).is_err());
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn test_encode_empty_and_zero() {
        for b in [Bitset::default(), Bitset::zeroed(100)] {
            let encoded = b.encode(6).unwrap();
            assert_eq!(encoded.decode().unwrap(), b);
        }
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert_eq!(EncodedBitset::new("!!!").decode().unwrap_err().code(), "BITSET_CODEC_ERROR");
        // Valid base64, not a zlib stream
        assert!(EncodedBitset::new("aGVsbG8=").decode().is_err());
    }

    #[test]
    fn test_encoded_serializes_as_string() {
        let encoded = Bitset::from_bytes(vec![1, 2, 3]).encode(9).unwrap();
        let json = serde_json::to_string(&encoded).unwrap();
        assert_eq!(json, format!("\"{}\"", encoded.as_str()));
    }

    proptest! {
        #[test]
        fn prop_pack_unpack_roundtrip(rows in 0usize..20, cols in 0usize..20, seed in any::<u64>()) {
            let cells: Vec<bool> = (0..rows * cols)
                .map(|i| (seed.rotate_left((i % 64) as u32) ^ i as u64) & 1 == 1)
                .collect();
            let mask = SelectionMask::from_cells(rows, cols, cells).unwrap();
            let packed = Bitset::pack(&mask);
            prop_assert_eq!(packed.len(), (rows * cols).div_ceil(8));
            prop_assert_eq!(packed.count_ones(), mask.count());
            prop_assert_eq!(packed.unpack(rows, cols).unwrap(), mask);
        }

        #[test]
        fn prop_encode_decode_roundtrip(bytes in proptest::collection::vec(any::<u8>(), 0..512), level in 0u32..=9) {
            let b = Bitset::from_bytes(bytes);
            prop_assert_eq!(b.encode(level).unwrap().decode().unwrap(), b);
        }
    }
}
