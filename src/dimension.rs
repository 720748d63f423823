//! Dimensions: typed value taxonomy, the index/label indirection store, and grids.
//!
//! A dimension's values are split into two parallel arrays: an *index* array of 1-based
//! positions and a *label* array of typed values. A [`DimensionInstance`] references both
//! through opaque handles into an [`IndexLabelStore`](store::IndexLabelStoreTraits), so
//! dimension values can be shared, reduced, or reused across datacubes without duplication.
//! A fully-reduced dimension has no label array; values are taken directly from the index
//! array (the natural sequence `1..size`).

pub mod data_type;
pub mod store;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use data_type::DimensionDataType;
use store::{IndexLabelStoreError, IndexLabelStoreTraits, IndexRef, LabelRef};

/// A grid identifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct GridId(pub u64);

/// A grid: a named, shared set of dimension definitions reusable across datacubes.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// The grid identifier.
    pub id: GridId,
    /// The grid name.
    pub name: String,
}

/// A dimension instance: one dimension of one datacube, with indirection into the store.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct DimensionInstance {
    /// The dimension identifier.
    pub dimension_id: u64,
    /// Handle to the index array (1-based positions into the label array).
    pub index_ref: IndexRef,
    /// Handle to the label array. [`None`] for a fully-reduced dimension, in which case the
    /// values are the natural sequence `1..size` taken from the index array.
    pub label_ref: Option<LabelRef>,
    /// The number of visible positions.
    pub size: u64,
    /// The grid the instance is bound to, if any.
    pub grid_id: Option<GridId>,
    /// The declared type of the label values.
    pub data_type: DimensionDataType,
    /// The aggregation granularity within the external hierarchy.
    pub concept_level: char,
    /// Whether the dimension is unlimited (growable).
    pub unlimited: bool,
}

/// A dimension instance whose referenced arrays disagree with its declared size.
#[derive(Clone, Debug, Error)]
pub enum DimensionValidationError {
    /// The declared size differs from the index array size.
    #[error("dimension {_0}: declared size {_1} does not match index array size {_2}")]
    IndexSizeMismatch(u64, u64, u64),
    /// The label array size differs from the index array size.
    #[error("dimension {_0}: label array size {_1} does not match index array size {_2}")]
    LabelSizeMismatch(u64, u64, u64),
    /// A store error while validating the referenced arrays.
    #[error(transparent)]
    Store(#[from] IndexLabelStoreError),
}

/// A grid binding rejection.
#[derive(Clone, Debug, Error)]
pub enum GridBindingError {
    /// The instances disagree on size or concept level.
    #[error("dimension {_0} (size {_1}, level {_2}) is incompatible with grid member of size {_3}, level {_4}")]
    IncompatibleShape(u64, u64, char, u64, char),
    /// The instances have equal shape but different underlying values.
    #[error("dimension {_0} has values differing from the grid's")]
    ValueMismatch(u64),
    /// A store error while validating values.
    #[error(transparent)]
    Store(#[from] IndexLabelStoreError),
}

impl DimensionInstance {
    /// Validate the instance against its referenced arrays: the index array must hold
    /// exactly [`size`](Self::size) positions, and a label array, when present, must hold as
    /// many values as the index array.
    ///
    /// # Errors
    /// Returns a [`DimensionValidationError`] if a referenced array is unknown or the sizes
    /// disagree.
    pub fn validate(
        &self,
        store: &dyn IndexLabelStoreTraits,
    ) -> Result<(), DimensionValidationError> {
        let index_size = store.index_size(self.index_ref)?;
        if index_size != self.size {
            return Err(DimensionValidationError::IndexSizeMismatch(
                self.dimension_id,
                self.size,
                index_size,
            ));
        }
        if let Some(label) = self.label_ref {
            let label_size = store.label_size(label)?;
            if label_size != index_size {
                return Err(DimensionValidationError::LabelSizeMismatch(
                    self.dimension_id,
                    label_size,
                    index_size,
                ));
            }
        }
        Ok(())
    }

    /// Returns true if this instance and `other` hold identical underlying values.
    ///
    /// Sharing is validated value-by-value, never assumed from names: sizes, concept levels
    /// and declared types must match, and the referenced label arrays (or index arrays for
    /// fully-reduced dimensions) must compare equal element-wise.
    ///
    /// # Errors
    /// Returns an [`IndexLabelStoreError`] if a referenced array is unknown or its stored
    /// type differs from the declared type.
    pub fn shares_values_with(
        &self,
        other: &Self,
        store: &dyn IndexLabelStoreTraits,
    ) -> Result<bool, IndexLabelStoreError> {
        if self.size != other.size
            || self.concept_level != other.concept_level
            || self.data_type != other.data_type
        {
            return Ok(false);
        }
        match (self.label_ref, other.label_ref) {
            (Some(label_a), Some(label_b)) => {
                store.compare(label_a, label_b, self.data_type, self.size)
            }
            (None, None) => {
                let index_a = store.read_index(self.index_ref, 0, self.size)?;
                let index_b = store.read_index(other.index_ref, 0, self.size)?;
                Ok(index_a == index_b)
            }
            _ => Ok(false),
        }
    }

    /// Validate this instance against a grid member and bind it to the grid.
    ///
    /// # Errors
    /// Returns a [`GridBindingError`] if the shapes are incompatible or the values differ.
    pub fn bind_to_grid(
        &mut self,
        grid: &Grid,
        member: &Self,
        store: &dyn IndexLabelStoreTraits,
    ) -> Result<(), GridBindingError> {
        if self.size != member.size || self.concept_level != member.concept_level {
            return Err(GridBindingError::IncompatibleShape(
                self.dimension_id,
                self.size,
                self.concept_level,
                member.size,
                member.concept_level,
            ));
        }
        if !self.shares_values_with(member, store)? {
            return Err(GridBindingError::ValueMismatch(self.dimension_id));
        }
        self.grid_id = Some(grid.id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use store::{IndexLabelStoreExt, MemoryIndexLabelStore};

    fn instance(
        dimension_id: u64,
        index_ref: IndexRef,
        label_ref: Option<LabelRef>,
        size: u64,
    ) -> DimensionInstance {
        DimensionInstance {
            dimension_id,
            index_ref,
            label_ref,
            size,
            grid_id: None,
            data_type: DimensionDataType::Float64,
            concept_level: 'd',
            unlimited: false,
        }
    }

    #[test]
    fn grid_binding_accepts_identical_values() {
        let store = MemoryIndexLabelStore::new();
        let labels: Vec<f64> = vec![10.0, 20.0, 30.0];
        let label_a = store.write_label_elements(&labels).unwrap();
        let label_b = store.write_label_elements(&labels).unwrap();
        let index_a = store.write_index(&[1, 2, 3]).unwrap();
        let index_b = store.write_index(&[1, 2, 3]).unwrap();

        let grid = Grid {
            id: GridId(1),
            name: "time_grid".to_string(),
        };
        let member = instance(1, index_a, Some(label_a), 3);
        let mut candidate = instance(2, index_b, Some(label_b), 3);
        candidate.bind_to_grid(&grid, &member, &store).unwrap();
        assert_eq!(candidate.grid_id, Some(GridId(1)));
    }

    #[test]
    fn grid_binding_rejects_differing_values() {
        let store = MemoryIndexLabelStore::new();
        let label_a = store.write_label_elements(&[10.0f64, 20.0, 30.0]).unwrap();
        let label_b = store.write_label_elements(&[10.0f64, 20.0, 31.0]).unwrap();
        let index = store.write_index(&[1, 2, 3]).unwrap();

        let grid = Grid {
            id: GridId(1),
            name: "time_grid".to_string(),
        };
        let member = instance(1, index, Some(label_a), 3);
        let mut candidate = instance(2, index, Some(label_b), 3);
        assert!(member.shares_values_with(&candidate, &store).is_ok_and(|equal| !equal));
        assert!(matches!(
            candidate.bind_to_grid(&grid, &member, &store),
            Err(GridBindingError::ValueMismatch(2))
        ));
        assert_eq!(candidate.grid_id, None);
    }

    #[test]
    fn validate_checks_referenced_array_sizes() {
        let store = MemoryIndexLabelStore::new();
        let label = store.write_label_elements(&[10.0f64, 20.0, 30.0]).unwrap();
        let short_label = store.write_label_elements(&[10.0f64, 20.0]).unwrap();
        let index = store.write_index(&[1, 2, 3]).unwrap();

        instance(1, index, Some(label), 3).validate(&store).unwrap();
        instance(1, index, None, 3).validate(&store).unwrap();

        // declared size disagrees with the index array
        assert!(matches!(
            instance(1, index, Some(label), 4).validate(&store),
            Err(DimensionValidationError::IndexSizeMismatch(1, 4, 3))
        ));
        // label array shorter than the index array
        assert!(matches!(
            instance(2, index, Some(short_label), 3).validate(&store),
            Err(DimensionValidationError::LabelSizeMismatch(2, 2, 3))
        ));
        // unknown handle surfaces the store error
        assert!(matches!(
            instance(3, IndexRef(99), None, 3).validate(&store),
            Err(DimensionValidationError::Store(_))
        ));
    }

    #[test]
    fn fully_reduced_dimensions_compare_by_index() {
        let store = MemoryIndexLabelStore::new();
        let index_a = store.write_index(&[1, 3, 5]).unwrap();
        let index_b = store.write_index(&[1, 3, 5]).unwrap();
        let index_c = store.write_index(&[1, 3, 6]).unwrap();

        let a = instance(1, index_a, None, 3);
        let b = instance(2, index_b, None, 3);
        let c = instance(3, index_c, None, 3);
        assert!(a.shares_values_with(&b, &store).unwrap());
        assert!(!a.shares_values_with(&c, &store).unwrap());
    }
}
