//! Fragment materialisation: the populate/read paths over a backing row store.
//!
//! [`populate`] pulls exactly `tuples_in_fragment` logical rows from an array source,
//! serialises them (optionally gzip-compressed) into the row store, and returns the
//! committed [`Fragment`] record. It shares no mutable state, so concurrent calls on
//! disjoint fragment slots are safe.
//!
//! [`read`] returns a lazy, finite sequence of [`Row`]s. A row's dimension columns
//! ([`Row::dimension_positions`]) are raw index positions derived from its key; callers
//! dereference them through the [index/label store](crate::dimension::store) to obtain
//! display values. Subsetting and display are index-table operations, not row-store
//! operations.

use std::collections::BTreeMap;
use std::iter::FusedIterator;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;

use crate::{
    datacube::{DatacubeId, Fragment},
    dimension::data_type::{DimensionDataType, TypeMismatchError},
    partition::FragmentSlot,
    source::{ArraySourceTraits, SourceError},
};

/// A fragment row store error.
#[derive(Clone, Debug, Error)]
pub enum FragmentStoreError {
    /// The fragment payload is unknown.
    #[error("fragment {_0:?} not found")]
    NotFound(String),
    /// An underlying store failure.
    #[error("fragment store failure: {_0}")]
    Other(String),
}

/// A materialisation error.
#[derive(Clone, Debug, Error)]
pub enum MaterializeError {
    /// A source read failure.
    #[error(transparent)]
    Source(#[from] SourceError),
    /// A row store failure.
    #[error(transparent)]
    Store(#[from] FragmentStoreError),
    /// The source data type disagrees with the datacube's measure type.
    #[error(transparent)]
    TypeMismatch(#[from] TypeMismatchError),
    /// The source returned fewer bytes than the fragment's tuple count requires.
    #[error("expected {_0} bytes for the fragment, got {_1}")]
    ShortRead(usize, usize),
    /// A compression failure.
    #[error("compression failed: {_0}")]
    Compression(String),
    /// Compressed payloads require the `gzip` feature.
    #[error("compressed fragment payloads require the gzip feature")]
    CompressionUnsupported,
}

/// Fragment row store traits.
///
/// One payload per fragment name. Deletes are idempotent: deleting an unknown fragment
/// succeeds, so rollback retries are safe.
pub trait FragmentStoreTraits: Send + Sync {
    /// Store a fragment payload.
    ///
    /// # Errors
    /// Returns a [`FragmentStoreError`] if there is an underlying store error.
    fn write(&self, name: &str, payload: Bytes) -> Result<(), FragmentStoreError>;

    /// Retrieve a fragment payload.
    ///
    /// # Errors
    /// Returns [`FragmentStoreError::NotFound`] for an unknown fragment.
    fn read(&self, name: &str) -> Result<Bytes, FragmentStoreError>;

    /// Delete a fragment payload. Deleting an unknown fragment is not an error.
    ///
    /// # Errors
    /// Returns a [`FragmentStoreError`] if there is an underlying store error.
    fn delete(&self, name: &str) -> Result<(), FragmentStoreError>;
}

/// An in-memory fragment row store.
#[derive(Debug, Default)]
pub struct MemoryFragmentStore {
    payloads: RwLock<BTreeMap<String, Bytes>>,
}

impl MemoryFragmentStore {
    /// Create a new in-memory fragment store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored fragment payloads, for test assertions on rollback.
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.payloads.read().len()
    }
}

impl FragmentStoreTraits for MemoryFragmentStore {
    fn write(&self, name: &str, payload: Bytes) -> Result<(), FragmentStoreError> {
        self.payloads.write().insert(name.to_string(), payload);
        Ok(())
    }

    fn read(&self, name: &str) -> Result<Bytes, FragmentStoreError> {
        self.payloads
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FragmentStoreError::NotFound(name.to_string()))
    }

    fn delete(&self, name: &str) -> Result<(), FragmentStoreError> {
        self.payloads.write().remove(name);
        Ok(())
    }
}

/// The physical name of a fragment in the row store.
#[must_use]
pub fn fragment_name(datacube_id: DatacubeId, relative_index: u64) -> String {
    format!("fact_{datacube_id}_{relative_index}")
}

/// Populate one fragment slot: pull its rows from `source`, serialise them into `store`,
/// and return the committed [`Fragment`] record.
///
/// # Errors
/// Returns a [`MaterializeError`] if the source type disagrees with `measure_type`, the
/// source returns the wrong number of bytes, compression fails, or the store write fails.
pub fn populate(
    slot: &FragmentSlot,
    datacube_id: DatacubeId,
    measure_type: DimensionDataType,
    compressed: bool,
    source: &dyn ArraySourceTraits,
    store: &dyn FragmentStoreTraits,
) -> Result<Fragment, MaterializeError> {
    let source_type = source.data_type();
    if source_type != measure_type {
        return Err(TypeMismatchError(measure_type, source_type).into());
    }

    let values = source.read_rows(slot.key_start, slot.key_end)?;
    let expected = usize::try_from(slot.tuples_in_fragment).unwrap() * measure_type.size();
    if values.len() != expected {
        return Err(MaterializeError::ShortRead(expected, values.len()));
    }

    let payload = if compressed {
        compress(&values)?
    } else {
        values
    };

    let name = fragment_name(datacube_id, slot.relative_index);
    store.write(&name, payload)?;
    Ok(Fragment {
        datacube_id,
        db_slot_id: slot.db_slot,
        relative_index: slot.relative_index,
        key_start: slot.key_start,
        key_end: slot.key_end,
        name,
    })
}

/// Read all rows of a fragment as a lazy, finite sequence.
///
/// `explicit_sizes` are the explicit-dimension sizes, row-major; each row's
/// [`dimension_positions`](Row::dimension_positions) are derived from them. The sequence is
/// restartable only by re-invoking `read`.
///
/// # Errors
/// Returns a [`MaterializeError`] if the payload is missing, decompression fails, or the
/// payload length disagrees with the fragment's key range.
pub fn read(
    fragment: &Fragment,
    explicit_sizes: &[u64],
    measure_type: DimensionDataType,
    compressed: bool,
    store: &dyn FragmentStoreTraits,
) -> Result<FragmentRows, MaterializeError> {
    read_keys(
        fragment,
        explicit_sizes,
        fragment.key_start,
        fragment.key_end,
        measure_type,
        compressed,
        store,
    )
}

/// Read the rows of a fragment with keys in `[key_start, key_end]`.
///
/// Key-range predicates push down to this sub-range read; all other predicates and
/// projections are index-table operations applied by the caller.
///
/// # Errors
/// Returns a [`MaterializeError`] as [`read`] does, or if the key range is outside the
/// fragment.
pub fn read_keys(
    fragment: &Fragment,
    explicit_sizes: &[u64],
    key_start: u64,
    key_end: u64,
    measure_type: DimensionDataType,
    compressed: bool,
    store: &dyn FragmentStoreTraits,
) -> Result<FragmentRows, MaterializeError> {
    let payload = store.read(&fragment.name)?;
    let values = if compressed {
        decompress(&payload)?
    } else {
        payload
    };
    let value_size = measure_type.size();
    let expected =
        usize::try_from(fragment.key_end - fragment.key_start + 1).unwrap() * value_size;
    if values.len() != expected {
        return Err(MaterializeError::ShortRead(expected, values.len()));
    }
    if key_start < fragment.key_start || key_end > fragment.key_end || key_start > key_end {
        return Err(SourceError::SliceOutOfBounds(key_start, key_end, fragment.key_end).into());
    }

    let skip = usize::try_from(key_start - fragment.key_start).unwrap() * value_size;
    let take = usize::try_from(key_end - key_start + 1).unwrap() * value_size;
    Ok(FragmentRows {
        values: values.slice(skip..skip + take),
        value_size,
        explicit_sizes: explicit_sizes.to_vec(),
        key_front: key_start,
        key_back: key_end + 1,
    })
}

/// A lazy, finite sequence of the rows of a fragment.
///
/// See [`read`].
#[derive(Clone, Debug)]
pub struct FragmentRows {
    values: Bytes,
    value_size: usize,
    explicit_sizes: Vec<u64>,
    key_front: u64,
    key_back: u64,
}

/// One logical row of a fragment: its key, its dimension columns, and its raw measure
/// value bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Row {
    /// The logical row key.
    pub key: u64,
    /// The 1-based explicit-dimension index positions of the row, row-major. Raw positions;
    /// display values come from dereferencing through the index/label store.
    pub dimension_positions: Vec<u64>,
    /// The measure value bytes.
    pub value: Bytes,
}

impl Iterator for FragmentRows {
    type Item = Row;

    fn next(&mut self) -> Option<Self::Item> {
        if self.key_front < self.key_back {
            let offset = self.values.len() - usize::try_from(self.key_back - self.key_front).unwrap() * self.value_size;
            let row = Row {
                key: self.key_front,
                dimension_positions: dimension_positions(self.key_front, &self.explicit_sizes),
                value: self.values.slice(offset..offset + self.value_size),
            };
            self.key_front += 1;
            Some(row)
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let length = usize::try_from(self.key_back - self.key_front).unwrap();
        (length, Some(length))
    }
}

impl ExactSizeIterator for FragmentRows {}

impl FusedIterator for FragmentRows {}

/// The 1-based explicit-dimension index positions of the row with 1-based `key`, row-major.
///
/// These are the raw dimension columns of a row; display values come from dereferencing the
/// positions through the index/label store.
#[must_use]
pub fn dimension_positions(key: u64, explicit_sizes: &[u64]) -> Vec<u64> {
    debug_assert!(key >= 1);
    let mut remainder = key - 1;
    let mut positions = vec![0; explicit_sizes.len()];
    for (position, size) in positions.iter_mut().zip(explicit_sizes).rev() {
        *position = remainder % size + 1;
        remainder /= size;
    }
    positions
}

#[cfg(feature = "gzip")]
fn compress(bytes: &Bytes) -> Result<Bytes, MaterializeError> {
    use std::io::Write;
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(bytes)
        .and_then(|()| encoder.finish())
        .map(Bytes::from)
        .map_err(|err| MaterializeError::Compression(err.to_string()))
}

#[cfg(feature = "gzip")]
fn decompress(bytes: &Bytes) -> Result<Bytes, MaterializeError> {
    use std::io::Read;
    let mut decoder = flate2::read::GzDecoder::new(bytes.as_ref());
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map(|_| Bytes::from(out))
        .map_err(|err| MaterializeError::Compression(err.to_string()))
}

#[cfg(not(feature = "gzip"))]
fn compress(_bytes: &Bytes) -> Result<Bytes, MaterializeError> {
    Err(MaterializeError::CompressionUnsupported)
}

#[cfg(not(feature = "gzip"))]
fn decompress(_bytes: &Bytes) -> Result<Bytes, MaterializeError> {
    Err(MaterializeError::CompressionUnsupported)
}
