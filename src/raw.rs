//! Raw sensor counts as handed over by the extraction
//! collaborator.
//!
//! Cameras store the 16-bit counts in either byte order; the
//! declared [`RawEncoding`] is used to normalize them into a
//! native grid before any conversion happens.
use std::io::Cursor;

use byteordered::{ByteOrdered, Endianness};
use ndarray::{Array2, ArrayView2};
use serde_derive::*;

use crate::error::{Result, ThermalError};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl From<ByteOrder> for Endianness {
    fn from(order: ByteOrder) -> Self {
        match order {
            ByteOrder::LittleEndian => Endianness::Little,
            ByteOrder::BigEndian => Endianness::Big,
        }
    }
}

/// Declared layout of a raw count buffer: row-major,
/// two bytes per pixel.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEncoding {
    pub width: usize,
    pub height: usize,
    pub byte_order: ByteOrder,
}

impl RawEncoding {
    pub fn expected_len(&self) -> usize {
        2 * self.width * self.height
    }
}

/// Immutable grid of raw sensor counts.
#[derive(Debug, Clone, PartialEq)]
pub struct RawThermalFrame {
    counts: Array2<u16>,
}

impl RawThermalFrame {
    /// Wrap counts already in native byte order. The array
    /// is indexed `(row, col)`.
    pub fn from_array(counts: Array2<u16>) -> Self {
        RawThermalFrame { counts }
    }

    /// Decode a byte buffer according to `encoding`.
    pub fn from_bytes(bytes: &[u8], encoding: RawEncoding) -> Result<Self> {
        let expected = encoding.expected_len();
        if bytes.len() != expected {
            return Err(ThermalError::DimensionMismatch {
                expected,
                found: bytes.len(),
            });
        }

        let mut rdr = ByteOrdered::runtime(Cursor::new(bytes), encoding.byte_order.into());
        let mut counts = Vec::with_capacity(encoding.width * encoding.height);
        for _ in 0..encoding.width * encoding.height {
            counts.push(rdr.read_u16()?);
        }

        let counts = Array2::from_shape_vec((encoding.height, encoding.width), counts)
            .map_err(|_| ThermalError::DimensionMismatch {
                expected,
                found: bytes.len(),
            })?;
        Ok(RawThermalFrame { counts })
    }

    pub fn counts(&self) -> ArrayView2<u16> {
        self.counts.view()
    }

    /// `(width, height)`
    pub fn dim(&self) -> (usize, usize) {
        let (ht, wid) = self.counts.dim();
        (wid, ht)
    }
}
