//! The array source boundary.
//!
//! A source hands the core typed measure values for logical row ranges; the core never
//! parses the source file format itself (ESDM/NetCDF-style readers live behind this trait).

use std::collections::BTreeMap;

use bytes::Bytes;
use thiserror::Error;

use crate::dimension::data_type::DimensionDataType;

/// The shape of an array.
pub type ArrayShape = Vec<u64>;

/// An array source error.
#[derive(Clone, Debug, Error)]
pub enum SourceError {
    /// A dimension index is out of bounds.
    #[error("dimension {_0} is out of bounds for an array of dimensionality {_1}")]
    InvalidDimension(usize, usize),
    /// A slice exceeds the dimension extent.
    #[error("slice [{_0}, {_1}) exceeds extent {_2}")]
    SliceOutOfBounds(u64, u64, u64),
    /// An underlying read failure.
    #[error("source read failed: {_0}")]
    Read(String),
}

/// Array source traits.
pub trait ArraySourceTraits: Send + Sync {
    /// The shape of the source array.
    fn shape(&self) -> ArrayShape;

    /// The data type of the measure values.
    fn data_type(&self) -> DimensionDataType;

    /// Read the values of dimension `dim` over positions `[start, end)` as a typed buffer.
    ///
    /// # Errors
    /// Returns a [`SourceError`] if the dimension or slice is out of bounds or the read
    /// fails.
    fn read_slice(&self, dim: usize, start: u64, end: u64) -> Result<Bytes, SourceError>;

    /// Read the measure values of the logical rows with 1-based keys `[key_start, key_end]`
    /// in row-major linearisation order.
    ///
    /// # Errors
    /// Returns a [`SourceError`] if the key range is out of bounds or the read fails.
    fn read_rows(&self, key_start: u64, key_end: u64) -> Result<Bytes, SourceError>;

    /// The source attributes (key/value pairs).
    fn attributes(&self) -> BTreeMap<String, String>;
}

/// A deterministic synthetic source: the measure value of key `k` is `k as f64`.
///
/// Used by tests and dry runs; two reads of the same key range always return the same bytes.
#[derive(Clone, Debug)]
pub struct SyntheticSource {
    shape: ArrayShape,
}

impl SyntheticSource {
    /// Create a synthetic source with the given shape.
    #[must_use]
    pub fn new(shape: ArrayShape) -> Self {
        Self { shape }
    }

    fn row_count(&self) -> u64 {
        self.shape.iter().product()
    }
}

impl ArraySourceTraits for SyntheticSource {
    fn shape(&self) -> ArrayShape {
        self.shape.clone()
    }

    fn data_type(&self) -> DimensionDataType {
        DimensionDataType::Float64
    }

    fn read_slice(&self, dim: usize, start: u64, end: u64) -> Result<Bytes, SourceError> {
        let extent = *self
            .shape
            .get(dim)
            .ok_or(SourceError::InvalidDimension(dim, self.shape.len()))?;
        if start > end || end > extent {
            return Err(SourceError::SliceOutOfBounds(start, end, extent));
        }
        let values: Vec<f64> = (start..end).map(|position| position as f64).collect();
        Ok(Bytes::from(bytemuck::cast_slice(&values).to_vec()))
    }

    fn read_rows(&self, key_start: u64, key_end: u64) -> Result<Bytes, SourceError> {
        let rows = self.row_count();
        if key_start == 0 || key_start > key_end || key_end > rows {
            return Err(SourceError::SliceOutOfBounds(key_start, key_end, rows));
        }
        let values: Vec<f64> = (key_start..=key_end).map(|key| key as f64).collect();
        Ok(Bytes::from(bytemuck::cast_slice(&values).to_vec()))
    }

    fn attributes(&self) -> BTreeMap<String, String> {
        BTreeMap::from([("generator".to_string(), "synthetic".to_string())])
    }
}
