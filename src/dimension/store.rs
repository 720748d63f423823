//! The dimension index/label store.
//!
//! Index and label arrays are append-only typed buffers addressed by stable opaque handles
//! ([`IndexRef`], [`LabelRef`]). Reads are random access over element sub-ranges; a buffer is
//! never loaded wholesale to serve a range. [`reduce`](IndexLabelStoreTraits::reduce) builds
//! a smaller index array over the *same unmodified* label array, which is how two datacubes
//! share label storage while differing in which positions are visible.

use derive_more::Display;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::data_type::{DimensionDataType, DimensionValue, TypeMismatchError};

/// A stable opaque handle to a label array.
#[derive(
    Copy, Clone, Debug, Display, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct LabelRef(pub u64);

/// A stable opaque handle to an index array.
#[derive(
    Copy, Clone, Debug, Display, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct IndexRef(pub u64);

/// An index/label store error.
#[derive(Clone, Debug, Error)]
pub enum IndexLabelStoreError {
    /// The label array is unknown.
    #[error("label array {_0} not found")]
    LabelNotFound(LabelRef),
    /// The index array is unknown.
    #[error("index array {_0} not found")]
    IndexNotFound(IndexRef),
    /// A declared type disagrees with a stored buffer's tag.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),
    /// An element range exceeds the array size.
    #[error("element range [{_0}, {_0} + {_1}) is out of range for an array of {_2} elements")]
    InvalidRange(u64, u64, u64),
    /// A kept position exceeds the index array size.
    #[error("kept position {_0} is out of range for an index array of {_1} elements")]
    PositionOutOfBounds(u64, u64),
    /// A label byte buffer is not a whole number of values.
    #[error("label buffer of {_0} bytes is not a multiple of the {_1} value size")]
    UnalignedBuffer(usize, DimensionDataType),
}

/// Index/label store traits.
///
/// Arrays are append-only; handles remain valid for the lifetime of the store.
pub trait IndexLabelStoreTraits: Send + Sync {
    /// Append a label array of `data_type` values and return its handle.
    ///
    /// # Errors
    /// Returns [`IndexLabelStoreError::UnalignedBuffer`] if `bytes` is not a whole number of
    /// values of `data_type`.
    fn write_label(
        &self,
        data_type: DimensionDataType,
        bytes: &[u8],
    ) -> Result<LabelRef, IndexLabelStoreError>;

    /// Append an index array of 1-based positions and return its handle.
    ///
    /// # Errors
    /// Returns an [`IndexLabelStoreError`] if there is an underlying store error.
    fn write_index(&self, positions: &[i64]) -> Result<IndexRef, IndexLabelStoreError>;

    /// The stored type tag of a label array.
    ///
    /// # Errors
    /// Returns [`IndexLabelStoreError::LabelNotFound`] for an unknown handle.
    fn label_data_type(&self, label: LabelRef) -> Result<DimensionDataType, IndexLabelStoreError>;

    /// The number of elements in a label array.
    ///
    /// # Errors
    /// Returns [`IndexLabelStoreError::LabelNotFound`] for an unknown handle.
    fn label_size(&self, label: LabelRef) -> Result<u64, IndexLabelStoreError>;

    /// The number of elements in an index array.
    ///
    /// # Errors
    /// Returns [`IndexLabelStoreError::IndexNotFound`] for an unknown handle.
    fn index_size(&self, index: IndexRef) -> Result<u64, IndexLabelStoreError>;

    /// Read the bytes of label elements `[start, start + count)`.
    ///
    /// # Errors
    /// Returns an [`IndexLabelStoreError`] for an unknown handle or an out-of-range request.
    fn read_label(
        &self,
        label: LabelRef,
        start: u64,
        count: u64,
    ) -> Result<Vec<u8>, IndexLabelStoreError>;

    /// Read index elements `[start, start + count)`.
    ///
    /// # Errors
    /// Returns an [`IndexLabelStoreError`] for an unknown handle or an out-of-range request.
    fn read_index(
        &self,
        index: IndexRef,
        start: u64,
        count: u64,
    ) -> Result<Vec<i64>, IndexLabelStoreError>;

    /// Reduce a dimension to the index elements at 0-based `keep_positions`.
    ///
    /// Produces a new, smaller index array whose entries point at the same unmodified label
    /// array; no label data is copied. Reading the reduced pair at position `p` yields the
    /// value of the original pair at `keep_positions[p]`.
    ///
    /// # Errors
    /// Returns an [`IndexLabelStoreError`] if a handle is unknown or a kept position is out
    /// of range.
    fn reduce(
        &self,
        label: LabelRef,
        index: IndexRef,
        keep_positions: &[u64],
    ) -> Result<(LabelRef, IndexRef), IndexLabelStoreError> {
        // the label handle must exist even though its data is untouched
        self.label_size(label)?;
        let size = self.index_size(index)?;
        let positions = self.read_index(index, 0, size)?;
        let mut reduced = Vec::with_capacity(keep_positions.len());
        for &keep in keep_positions {
            let keep_usize = usize::try_from(keep)
                .map_err(|_| IndexLabelStoreError::PositionOutOfBounds(keep, size))?;
            reduced.push(
                *positions
                    .get(keep_usize)
                    .ok_or(IndexLabelStoreError::PositionOutOfBounds(keep, size))?,
            );
        }
        let reduced_index = self.write_index(&reduced)?;
        Ok((label, reduced_index))
    }

    /// Compare two label arrays value-by-value over their first `size` elements.
    ///
    /// Used before allowing two dimension instances to bind to the same grid.
    ///
    /// # Errors
    /// Returns [`TypeMismatchError`](IndexLabelStoreError::TypeMismatch) if either stored
    /// tag differs from `data_type`, and an [`IndexLabelStoreError`] for unknown handles or
    /// arrays shorter than `size`.
    fn compare(
        &self,
        label_a: LabelRef,
        label_b: LabelRef,
        data_type: DimensionDataType,
        size: u64,
    ) -> Result<bool, IndexLabelStoreError> {
        for label in [label_a, label_b] {
            let stored = self.label_data_type(label)?;
            if stored != data_type {
                return Err(TypeMismatchError(data_type, stored).into());
            }
        }
        let bytes_a = self.read_label(label_a, 0, size)?;
        let bytes_b = self.read_label(label_b, 0, size)?;
        Ok(bytes_a == bytes_b)
    }
}

/// Convenience methods for typed access to an index/label store.
pub trait IndexLabelStoreExt: IndexLabelStoreTraits {
    /// Append a label array from typed values.
    ///
    /// # Errors
    /// Returns an [`IndexLabelStoreError`] if there is an underlying store error.
    fn write_label_elements<T: DimensionValue>(
        &self,
        values: &[T],
    ) -> Result<LabelRef, IndexLabelStoreError> {
        self.write_label(T::DATA_TYPE, bytemuck::cast_slice(values))
    }

    /// Read label elements `[start, start + count)` as typed values.
    ///
    /// # Errors
    /// Returns [`TypeMismatchError`](IndexLabelStoreError::TypeMismatch) if the stored tag
    /// differs from `T`, and an [`IndexLabelStoreError`] for an unknown handle or an
    /// out-of-range request.
    fn read_label_elements<T: DimensionValue>(
        &self,
        label: LabelRef,
        start: u64,
        count: u64,
    ) -> Result<Vec<T>, IndexLabelStoreError> {
        let stored = self.label_data_type(label)?;
        if stored != T::DATA_TYPE {
            return Err(TypeMismatchError(T::DATA_TYPE, stored).into());
        }
        let bytes = self.read_label(label, start, count)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    /// Dereference one visible position of an index/label pair to its typed label value.
    ///
    /// `position` is 0-based over the index array; the index entry is a 1-based position
    /// into the label array.
    ///
    /// # Errors
    /// Returns an [`IndexLabelStoreError`] for unknown handles, type mismatches, or
    /// out-of-range positions.
    fn dereference<T: DimensionValue>(
        &self,
        label: LabelRef,
        index: IndexRef,
        position: u64,
    ) -> Result<T, IndexLabelStoreError> {
        let entry = self.read_index(index, position, 1)?[0];
        let label_position = u64::try_from(entry - 1).map_err(|_| {
            IndexLabelStoreError::PositionOutOfBounds(position, self.index_size(index).unwrap_or(0))
        })?;
        Ok(self.read_label_elements(label, label_position, 1)?[0])
    }
}

impl<T: ?Sized + IndexLabelStoreTraits> IndexLabelStoreExt for T {}

#[derive(Debug)]
struct LabelEntry {
    data_type: DimensionDataType,
    bytes: Vec<u8>,
}

/// An in-memory index/label store.
///
/// Handles are 1-based row positions in the backing tables.
#[derive(Debug, Default)]
pub struct MemoryIndexLabelStore {
    labels: RwLock<Vec<LabelEntry>>,
    indices: RwLock<Vec<Vec<i64>>>,
}

impl MemoryIndexLabelStore {
    /// Create a new in-memory index/label store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn element_range(start: u64, count: u64, size: u64) -> Result<std::ops::Range<usize>, IndexLabelStoreError> {
    if start + count > size {
        return Err(IndexLabelStoreError::InvalidRange(start, count, size));
    }
    let start = usize::try_from(start).unwrap();
    let count = usize::try_from(count).unwrap();
    Ok(start..start + count)
}

impl IndexLabelStoreTraits for MemoryIndexLabelStore {
    fn write_label(
        &self,
        data_type: DimensionDataType,
        bytes: &[u8],
    ) -> Result<LabelRef, IndexLabelStoreError> {
        if bytes.len() % data_type.size() != 0 {
            return Err(IndexLabelStoreError::UnalignedBuffer(bytes.len(), data_type));
        }
        let mut labels = self.labels.write();
        labels.push(LabelEntry {
            data_type,
            bytes: bytes.to_vec(),
        });
        Ok(LabelRef(labels.len() as u64))
    }

    fn write_index(&self, positions: &[i64]) -> Result<IndexRef, IndexLabelStoreError> {
        let mut indices = self.indices.write();
        indices.push(positions.to_vec());
        Ok(IndexRef(indices.len() as u64))
    }

    fn label_data_type(&self, label: LabelRef) -> Result<DimensionDataType, IndexLabelStoreError> {
        let labels = self.labels.read();
        let entry = label_entry(&labels, label)?;
        Ok(entry.data_type)
    }

    fn label_size(&self, label: LabelRef) -> Result<u64, IndexLabelStoreError> {
        let labels = self.labels.read();
        let entry = label_entry(&labels, label)?;
        Ok((entry.bytes.len() / entry.data_type.size()) as u64)
    }

    fn index_size(&self, index: IndexRef) -> Result<u64, IndexLabelStoreError> {
        let indices = self.indices.read();
        let entry = index_entry(&indices, index)?;
        Ok(entry.len() as u64)
    }

    fn read_label(
        &self,
        label: LabelRef,
        start: u64,
        count: u64,
    ) -> Result<Vec<u8>, IndexLabelStoreError> {
        let labels = self.labels.read();
        let entry = label_entry(&labels, label)?;
        let value_size = entry.data_type.size();
        let size = (entry.bytes.len() / value_size) as u64;
        let range = element_range(start, count, size)?;
        Ok(entry.bytes[range.start * value_size..range.end * value_size].to_vec())
    }

    fn read_index(
        &self,
        index: IndexRef,
        start: u64,
        count: u64,
    ) -> Result<Vec<i64>, IndexLabelStoreError> {
        let indices = self.indices.read();
        let entry = index_entry(&indices, index)?;
        let range = element_range(start, count, entry.len() as u64)?;
        Ok(entry[range].to_vec())
    }
}

fn label_entry(labels: &[LabelEntry], label: LabelRef) -> Result<&LabelEntry, IndexLabelStoreError> {
    (label.0 >= 1)
        .then(|| labels.get(usize::try_from(label.0 - 1).unwrap()))
        .flatten()
        .ok_or(IndexLabelStoreError::LabelNotFound(label))
}

fn index_entry(indices: &[Vec<i64>], index: IndexRef) -> Result<&Vec<i64>, IndexLabelStoreError> {
    (index.0 >= 1)
        .then(|| indices.get(usize::try_from(index.0 - 1).unwrap()))
        .flatten()
        .ok_or(IndexLabelStoreError::IndexNotFound(index))
}
