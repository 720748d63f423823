//! Datacube and fragment catalog records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{dimension::data_type::DimensionDataType, fragment_id_set::FragmentIdSet};

/// A datacube identifier.
#[derive(
    Copy, Clone, Debug, derive_more::Display, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
pub struct DatacubeId(pub u64);

/// A datacube: a logical N-dimensional array dataset tracked in the catalog.
///
/// Created once by the planner when a new datacube is materialised. Immutable once committed
/// except for [`fragment_id_set`](Datacube::fragment_id_set), which is rewritten if a later
/// operation produces a derived cube.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Datacube {
    /// The datacube identifier.
    pub id: DatacubeId,
    /// The total number of fragments.
    pub total_fragment_count: u64,
    /// The number of hosts receiving fragments.
    pub host_number: u64,
    /// The number of fragments per database slot.
    pub fragments_per_db: u64,
    /// The baseline number of tuples per fragment.
    pub tuples_per_fragment: u64,
    /// Whether fragment payloads are compressed.
    pub compressed: bool,
    /// The data type of the measure values.
    pub measure_type: DimensionDataType,
    /// The set of fragment-relative indices belonging to this cube.
    pub fragment_id_set: FragmentIdSet,
}

/// A fragment: a contiguous, disjoint slice of a datacube's logical rows, stored as one
/// physical unit.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// The owning datacube.
    pub datacube_id: DatacubeId,
    /// The database slot the fragment is stored in.
    pub db_slot_id: u64,
    /// The 1-based, dense fragment-relative index.
    pub relative_index: u64,
    /// The first key of the fragment (inclusive).
    pub key_start: u64,
    /// The last key of the fragment (inclusive).
    pub key_end: u64,
    /// The physical fragment name in the backing row store.
    pub name: String,
}

/// A fragment set invariant violation.
#[derive(Clone, Debug, Error)]
pub enum FragmentSetError {
    /// The number of fragments does not match the datacube's total.
    #[error("expected {_0} fragments, got {_1}")]
    WrongCount(u64, u64),
    /// The relative indices are not the dense set `1..=total`.
    #[error("fragment relative indices are not the dense set 1..={_0}")]
    SparseIndices(u64),
    /// The key ranges have a gap or overlap.
    #[error("fragment {_0} covers keys [{_1}, {_2}], expected key_start {_3}")]
    BrokenKeyChain(u64, u64, u64, u64),
    /// The key ranges do not cover the logical row space.
    #[error("fragments cover {_0} rows, expected {_1}")]
    WrongRowCount(u64, u64),
}

impl Datacube {
    /// Validate that `fragments` satisfies the datacube's fragment-set invariants:
    /// dense 1-based relative indices, gap-free and overlap-free key ranges, and key ranges
    /// covering exactly `[1, logical_row_count]`.
    ///
    /// # Errors
    /// Returns a [`FragmentSetError`] describing the first violated invariant.
    pub fn validate_fragments(
        &self,
        fragments: &[Fragment],
        logical_row_count: u64,
    ) -> Result<(), FragmentSetError> {
        if fragments.len() as u64 != self.total_fragment_count {
            return Err(FragmentSetError::WrongCount(
                self.total_fragment_count,
                fragments.len() as u64,
            ));
        }
        let mut fragments: Vec<&Fragment> = fragments.iter().collect();
        fragments.sort_by_key(|fragment| fragment.relative_index);
        let dense = fragments
            .iter()
            .zip(1..)
            .all(|(fragment, expected)| fragment.relative_index == expected);
        if !dense {
            return Err(FragmentSetError::SparseIndices(self.total_fragment_count));
        }
        let mut next_key = 1;
        for fragment in &fragments {
            if fragment.key_start != next_key || fragment.key_end < fragment.key_start {
                return Err(FragmentSetError::BrokenKeyChain(
                    fragment.relative_index,
                    fragment.key_start,
                    fragment.key_end,
                    next_key,
                ));
            }
            next_key = fragment.key_end + 1;
        }
        if next_key != logical_row_count + 1 {
            return Err(FragmentSetError::WrongRowCount(
                next_key - 1,
                logical_row_count,
            ));
        }
        Ok(())
    }
}
