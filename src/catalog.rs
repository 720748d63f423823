//! The relational catalog boundary.
//!
//! The core treats the catalog as a simple CRUD collaborator; schema and connection details
//! live outside this crate. [`MemoryCatalog`] is the in-memory implementation backing tests
//! and single-process runs. Only the coordinating worker mutates datacube/fragment rows.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::{
    datacube::{Datacube, DatacubeId, Fragment},
    dimension::{store::IndexLabelStoreTraits, DimensionInstance, Grid, GridBindingError, GridId},
};

/// A catalog error.
#[derive(Clone, Debug, Error)]
pub enum CatalogError {
    /// The datacube is unknown.
    #[error("datacube {_0} not found")]
    DatacubeNotFound(DatacubeId),
    /// A grid binding was refused.
    #[error(transparent)]
    GridBinding(#[from] GridBindingError),
}

/// Catalog traits.
///
/// Deletes are idempotent: deleting a nonexistent datacube is not an error, so rollback
/// retries leave catalog state unchanged.
pub trait CatalogTraits: Send + Sync {
    /// Retrieve a datacube record.
    ///
    /// # Errors
    /// Returns [`CatalogError::DatacubeNotFound`] for an unknown id.
    fn get_datacube(&self, id: DatacubeId) -> Result<Datacube, CatalogError>;

    /// Insert a datacube record, assigning its id.
    ///
    /// # Errors
    /// Returns a [`CatalogError`] if there is an underlying catalog error.
    fn insert_datacube(&self, record: Datacube) -> Result<DatacubeId, CatalogError>;

    /// Insert fragment records.
    ///
    /// # Errors
    /// Returns a [`CatalogError`] if there is an underlying catalog error.
    fn insert_fragments(&self, fragments: Vec<Fragment>) -> Result<(), CatalogError>;

    /// List the fragment records of a datacube.
    ///
    /// # Errors
    /// Returns a [`CatalogError`] if there is an underlying catalog error.
    fn list_fragments(&self, id: DatacubeId) -> Result<Vec<Fragment>, CatalogError>;

    /// Delete a datacube's rows (datacube, fragments, dimension instances).
    ///
    /// Idempotent: deleting an unknown datacube succeeds.
    ///
    /// # Errors
    /// Returns a [`CatalogError`] if there is an underlying catalog error.
    fn delete_datacube(&self, id: DatacubeId) -> Result<(), CatalogError>;

    /// Insert the dimension instances of a datacube.
    ///
    /// # Errors
    /// Returns a [`CatalogError`] if there is an underlying catalog error.
    fn insert_dimension_instances(
        &self,
        id: DatacubeId,
        instances: Vec<DimensionInstance>,
    ) -> Result<(), CatalogError>;

    /// List the dimension instances of a datacube.
    ///
    /// # Errors
    /// Returns a [`CatalogError`] if there is an underlying catalog error.
    fn list_dimension_instances(
        &self,
        id: DatacubeId,
    ) -> Result<Vec<DimensionInstance>, CatalogError>;

    /// Bind a dimension instance to the named grid, creating the grid if it does not exist.
    ///
    /// When the grid already has a member, the candidate is validated value-by-value against
    /// it through `store`; a mismatch refuses the bind.
    ///
    /// # Errors
    /// Returns [`CatalogError::GridBinding`] if validation refuses the bind.
    fn bind_grid(
        &self,
        name: &str,
        instance: &mut DimensionInstance,
        store: &dyn IndexLabelStoreTraits,
    ) -> Result<GridId, CatalogError>;
}

#[derive(Debug, Default)]
struct CatalogTables {
    datacubes: BTreeMap<DatacubeId, Datacube>,
    fragments: BTreeMap<DatacubeId, Vec<Fragment>>,
    dimension_instances: BTreeMap<DatacubeId, Vec<DimensionInstance>>,
    grids: Vec<(Grid, DimensionInstance)>,
    next_datacube_id: u64,
}

/// An in-memory catalog.
#[derive(Debug)]
pub struct MemoryCatalog {
    tables: RwLock<CatalogTables>,
}

impl MemoryCatalog {
    /// Create a new in-memory catalog.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(CatalogTables {
                next_datacube_id: 1,
                ..CatalogTables::default()
            }),
        }
    }

    /// The number of datacube rows, for test assertions on rollback.
    #[must_use]
    pub fn datacube_count(&self) -> usize {
        self.tables.read().datacubes.len()
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogTraits for MemoryCatalog {
    fn get_datacube(&self, id: DatacubeId) -> Result<Datacube, CatalogError> {
        self.tables
            .read()
            .datacubes
            .get(&id)
            .cloned()
            .ok_or(CatalogError::DatacubeNotFound(id))
    }

    fn insert_datacube(&self, mut record: Datacube) -> Result<DatacubeId, CatalogError> {
        let mut tables = self.tables.write();
        let id = DatacubeId(tables.next_datacube_id);
        tables.next_datacube_id += 1;
        record.id = id;
        tables.datacubes.insert(id, record);
        Ok(id)
    }

    fn insert_fragments(&self, fragments: Vec<Fragment>) -> Result<(), CatalogError> {
        let mut tables = self.tables.write();
        for fragment in fragments {
            tables
                .fragments
                .entry(fragment.datacube_id)
                .or_default()
                .push(fragment);
        }
        Ok(())
    }

    fn list_fragments(&self, id: DatacubeId) -> Result<Vec<Fragment>, CatalogError> {
        Ok(self.tables.read().fragments.get(&id).cloned().unwrap_or_default())
    }

    fn delete_datacube(&self, id: DatacubeId) -> Result<(), CatalogError> {
        let mut tables = self.tables.write();
        tables.datacubes.remove(&id);
        tables.fragments.remove(&id);
        tables.dimension_instances.remove(&id);
        Ok(())
    }

    fn insert_dimension_instances(
        &self,
        id: DatacubeId,
        instances: Vec<DimensionInstance>,
    ) -> Result<(), CatalogError> {
        self.tables
            .write()
            .dimension_instances
            .entry(id)
            .or_default()
            .extend(instances);
        Ok(())
    }

    fn list_dimension_instances(
        &self,
        id: DatacubeId,
    ) -> Result<Vec<DimensionInstance>, CatalogError> {
        Ok(self
            .tables
            .read()
            .dimension_instances
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn bind_grid(
        &self,
        name: &str,
        instance: &mut DimensionInstance,
        store: &dyn IndexLabelStoreTraits,
    ) -> Result<GridId, CatalogError> {
        let mut tables = self.tables.write();
        if let Some((grid, member)) = tables.grids.iter().find(|(grid, _)| grid.name == name) {
            instance.bind_to_grid(grid, member, store)?;
            Ok(grid.id)
        } else {
            let grid = Grid {
                id: GridId(tables.grids.len() as u64 + 1),
                name: name.to_string(),
            };
            let id = grid.id;
            instance.grid_id = Some(id);
            tables.grids.push((grid, instance.clone()));
            Ok(id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dimension::{
            data_type::DimensionDataType,
            store::{IndexLabelStoreExt, MemoryIndexLabelStore},
        },
        fragment_id_set::FragmentIdSet,
    };

    fn cube() -> Datacube {
        Datacube {
            id: DatacubeId(0),
            total_fragment_count: 2,
            host_number: 2,
            fragments_per_db: 1,
            tuples_per_fragment: 10,
            compressed: false,
            measure_type: DimensionDataType::Float32,
            fragment_id_set: FragmentIdSet::from_range(1, 2),
        }
    }

    #[test]
    fn insert_get_delete() {
        let catalog = MemoryCatalog::new();
        let id = catalog.insert_datacube(cube()).unwrap();
        assert_eq!(catalog.get_datacube(id).unwrap().id, id);

        catalog.delete_datacube(id).unwrap();
        assert!(catalog.get_datacube(id).is_err());
        // idempotent: deleting again is not an error
        catalog.delete_datacube(id).unwrap();
        assert_eq!(catalog.datacube_count(), 0);
    }

    #[test]
    fn grid_binding_via_catalog() {
        let catalog = MemoryCatalog::new();
        let store = MemoryIndexLabelStore::new();
        let label_a = store.write_label_elements(&[1.0f64, 2.0]).unwrap();
        let label_b = store.write_label_elements(&[1.0f64, 3.0]).unwrap();
        let index = store.write_index(&[1, 2]).unwrap();

        let mut first = DimensionInstance {
            dimension_id: 1,
            index_ref: index,
            label_ref: Some(label_a),
            size: 2,
            grid_id: None,
            data_type: DimensionDataType::Float64,
            concept_level: 'd',
            unlimited: false,
        };
        let grid_id = catalog.bind_grid("latitude", &mut first, &store).unwrap();
        assert_eq!(first.grid_id, Some(grid_id));

        // same values bind to the same grid
        let mut second = first.clone();
        second.dimension_id = 2;
        second.grid_id = None;
        assert_eq!(catalog.bind_grid("latitude", &mut second, &store).unwrap(), grid_id);

        // differing values are refused
        let mut third = first.clone();
        third.dimension_id = 3;
        third.grid_id = None;
        third.label_ref = Some(label_b);
        assert!(matches!(
            catalog.bind_grid("latitude", &mut third, &store),
            Err(CatalogError::GridBinding(GridBindingError::ValueMismatch(3)))
        ));
    }
}
