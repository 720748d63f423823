use std::sync::Arc;

use cubefrag::catalog::{CatalogTraits, MemoryCatalog};
use cubefrag::dimension::data_type::DimensionDataType;
use cubefrag::dimension::store::{
    IndexLabelStoreExt, IndexLabelStoreTraits, MemoryIndexLabelStore,
};
use cubefrag::dimension::DimensionInstance;
use cubefrag::executor::{self, ExecutionContext};
use cubefrag::materializer::{FragmentStoreTraits, MemoryFragmentStore};
use cubefrag::partition::{PartitionHints, PartitionRequest, RoundRobinSlotPolicy, SlotPolicy};
use cubefrag::source::SyntheticSource;

struct Fixture {
    ctx: ExecutionContext,
    catalog: Arc<MemoryCatalog>,
    fragment_store: Arc<MemoryFragmentStore>,
    dimension_store: Arc<MemoryIndexLabelStore>,
}

fn fixture() -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let catalog = Arc::new(MemoryCatalog::new());
    let fragment_store = Arc::new(MemoryFragmentStore::new());
    let dimension_store = Arc::new(MemoryIndexLabelStore::new());
    let ctx = ExecutionContext::new(
        catalog.clone(),
        fragment_store.clone(),
        dimension_store.clone(),
    )
    .with_worker_group_size(3)
    .with_threads_per_worker(2);
    Fixture {
        ctx,
        catalog,
        fragment_store,
        dimension_store,
    }
}

fn time_instance(store: &MemoryIndexLabelStore, size: u64) -> DimensionInstance {
    let labels: Vec<i64> = (0..size as i64).collect();
    let label_ref = store.write_label_elements(&labels).unwrap();
    let index_ref = store.write_index(&(1..=size as i64).collect::<Vec<i64>>()).unwrap();
    DimensionInstance {
        dimension_id: 1,
        index_ref,
        label_ref: Some(label_ref),
        size,
        grid_id: None,
        data_type: DimensionDataType::Int64,
        concept_level: 'd',
        unlimited: false,
    }
}

#[test]
fn populate_and_scan() {
    let fixture = fixture();
    let source: Arc<dyn cubefrag::source::ArraySourceTraits> =
        Arc::new(SyntheticSource::new(vec![10, 10]));
    let request = PartitionRequest::new(100, 100, PartitionHints::new(4, 2), 4);
    let instances = vec![time_instance(&fixture.dimension_store, 100)];

    let datacube =
        executor::populate_datacube(&fixture.ctx, &request, &source, false, instances).unwrap();
    assert_eq!(datacube.total_fragment_count, 8);
    assert_eq!(fixture.fragment_store.fragment_count(), 8);

    let fragments = fixture.catalog.list_fragments(datacube.id).unwrap();
    datacube.validate_fragments(&fragments, 100).unwrap();

    let rows: Vec<_> = executor::scan_datacube(&fixture.ctx, datacube.id)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 100);
    for (row, key) in rows.iter().zip(1u64..) {
        assert_eq!(row.key, key);
        assert_eq!(row.dimension_positions, vec![key]);
        let value: f64 = bytemuck::pod_read_unaligned(&row.value);
        assert_eq!(value, key as f64);
    }
}

#[test]
fn populate_with_round_robin_policy() {
    let fixture = fixture();
    let ctx = fixture
        .ctx
        .clone()
        .with_slot_policy(SlotPolicy::new(RoundRobinSlotPolicy));
    let source: Arc<dyn cubefrag::source::ArraySourceTraits> =
        Arc::new(SyntheticSource::new(vec![60]));
    let request = PartitionRequest::new(60, 60, PartitionHints::new(3, 2), 3);
    let instances = vec![time_instance(&fixture.dimension_store, 60)];

    let datacube = executor::populate_datacube(&ctx, &request, &source, false, instances).unwrap();
    let mut fragments = fixture.catalog.list_fragments(datacube.id).unwrap();
    fragments.sort_by_key(|fragment| fragment.relative_index);
    let slots: Vec<u64> = fragments.iter().map(|fragment| fragment.db_slot_id).collect();
    assert_eq!(slots, vec![0, 1, 2, 0, 1, 2]);
    datacube.validate_fragments(&fragments, 60).unwrap();
}

#[cfg(feature = "gzip")]
#[test]
fn populate_and_scan_compressed() {
    let fixture = fixture();
    let source: Arc<dyn cubefrag::source::ArraySourceTraits> =
        Arc::new(SyntheticSource::new(vec![100]));
    let request = PartitionRequest::new(100, 100, PartitionHints::new(3, 1), 3);
    let instances = vec![time_instance(&fixture.dimension_store, 100)];

    let datacube =
        executor::populate_datacube(&fixture.ctx, &request, &source, true, instances).unwrap();
    assert!(datacube.compressed);

    let rows: Vec<_> = executor::scan_datacube(&fixture.ctx, datacube.id)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 100);
    let value: f64 = bytemuck::pod_read_unaligned(&rows[99].value);
    assert_eq!(value, 100.0);
}

#[test]
fn populate_uneven_tail() {
    // 101 rows over 4 fragments: the first fragment absorbs the extra row
    let fixture = fixture();
    let source: Arc<dyn cubefrag::source::ArraySourceTraits> =
        Arc::new(SyntheticSource::new(vec![101]));
    let request = PartitionRequest::new(101, 101, PartitionHints::new(2, 2), 2);
    let instances = vec![time_instance(&fixture.dimension_store, 101)];

    let datacube =
        executor::populate_datacube(&fixture.ctx, &request, &source, false, instances).unwrap();
    let mut fragments = fixture.catalog.list_fragments(datacube.id).unwrap();
    fragments.sort_by_key(|fragment| fragment.relative_index);
    assert_eq!(fragments[0].key_end - fragments[0].key_start + 1, 26);
    assert_eq!(fragments[3].key_end - fragments[3].key_start + 1, 25);
    datacube.validate_fragments(&fragments, 101).unwrap();
}

#[test]
fn scan_reads_fragments_on_demand() {
    let fixture = fixture();
    let source: Arc<dyn cubefrag::source::ArraySourceTraits> =
        Arc::new(SyntheticSource::new(vec![100]));
    let request = PartitionRequest::new(100, 100, PartitionHints::new(4, 1), 4);
    let instances = vec![time_instance(&fixture.dimension_store, 100)];
    let datacube =
        executor::populate_datacube(&fixture.ctx, &request, &source, false, instances).unwrap();

    let mut scan = executor::scan_datacube(&fixture.ctx, datacube.id).unwrap();
    // deleting the last fragment's payload after the scan started only affects the scan
    // once it reaches that fragment
    let mut fragments = fixture.catalog.list_fragments(datacube.id).unwrap();
    fragments.sort_by_key(|fragment| fragment.relative_index);
    fixture.fragment_store.delete(&fragments[3].name).unwrap();

    let first = scan.next().unwrap().unwrap();
    assert_eq!(first.key, 1);
    let results: Vec<_> = scan.collect();
    assert!(results[..results.len() - 1].iter().all(Result::is_ok));
    assert!(results.last().unwrap().is_err());
}

#[test]
fn rejects_mismatched_dimension_instance() {
    let fixture = fixture();
    let source: Arc<dyn cubefrag::source::ArraySourceTraits> =
        Arc::new(SyntheticSource::new(vec![100]));
    let request = PartitionRequest::new(100, 100, PartitionHints::new(2, 1), 2);
    // arrays of 100 elements behind a declared size of 50
    let mut instance = time_instance(&fixture.dimension_store, 100);
    instance.size = 50;

    let error =
        executor::populate_datacube(&fixture.ctx, &request, &source, false, vec![instance])
            .unwrap_err();
    assert!(matches!(error, executor::ExecutionError::Dimension(_)));
    assert_eq!(fixture.catalog.datacube_count(), 0);
    assert_eq!(fixture.fragment_store.fragment_count(), 0);
}

#[test]
fn more_workers_than_fragments() {
    let fixture = fixture();
    let ctx = fixture
        .ctx
        .clone()
        .with_worker_group_size(8)
        .with_threads_per_worker(4);
    let source: Arc<dyn cubefrag::source::ArraySourceTraits> =
        Arc::new(SyntheticSource::new(vec![30]));
    let request = PartitionRequest::new(30, 30, PartitionHints::new(3, 1), 3);
    let instances = vec![time_instance(&fixture.dimension_store, 30)];

    let datacube = executor::populate_datacube(&ctx, &request, &source, false, instances).unwrap();
    let fragments = fixture.catalog.list_fragments(datacube.id).unwrap();
    datacube.validate_fragments(&fragments, 30).unwrap();
}
