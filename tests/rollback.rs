use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use cubefrag::catalog::MemoryCatalog;
use cubefrag::dimension::data_type::DimensionDataType;
use cubefrag::dimension::store::MemoryIndexLabelStore;
use cubefrag::executor::{self, ExecutionContext, ExecutionError};
use cubefrag::materializer::MemoryFragmentStore;
use cubefrag::partition::{PartitionHints, PartitionRequest};
use cubefrag::source::{ArrayShape, ArraySourceTraits, SourceError, SyntheticSource};

/// A synthetic source that fails every read overlapping `[fail_start, fail_end]`.
#[derive(Clone, Debug)]
struct FaultySource {
    inner: SyntheticSource,
    fail_start: u64,
    fail_end: u64,
}

impl FaultySource {
    fn new(rows: u64, fail_start: u64, fail_end: u64) -> Self {
        Self {
            inner: SyntheticSource::new(vec![rows]),
            fail_start,
            fail_end,
        }
    }
}

impl ArraySourceTraits for FaultySource {
    fn shape(&self) -> ArrayShape {
        self.inner.shape()
    }

    fn data_type(&self) -> DimensionDataType {
        self.inner.data_type()
    }

    fn read_slice(&self, dim: usize, start: u64, end: u64) -> Result<Bytes, SourceError> {
        self.inner.read_slice(dim, start, end)
    }

    fn read_rows(&self, key_start: u64, key_end: u64) -> Result<Bytes, SourceError> {
        if key_start <= self.fail_end && key_end >= self.fail_start {
            return Err(SourceError::Read("injected failure".to_string()));
        }
        self.inner.read_rows(key_start, key_end)
    }

    fn attributes(&self) -> BTreeMap<String, String> {
        self.inner.attributes()
    }
}

fn fixture() -> (ExecutionContext, Arc<MemoryCatalog>, Arc<MemoryFragmentStore>) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let catalog = Arc::new(MemoryCatalog::new());
    let fragment_store = Arc::new(MemoryFragmentStore::new());
    let dimension_store = Arc::new(MemoryIndexLabelStore::new());
    let ctx = ExecutionContext::new(catalog.clone(), fragment_store.clone(), dimension_store)
        .with_worker_group_size(3)
        .with_threads_per_worker(2);
    (ctx, catalog, fragment_store)
}

#[test]
fn failed_population_rolls_back() {
    let (ctx, catalog, fragment_store) = fixture();
    // the fault hits the fragment covering keys [35, 67]; other workers succeed
    let source: Arc<dyn ArraySourceTraits> = Arc::new(FaultySource::new(100, 40, 40));
    let request = PartitionRequest::new(100, 100, PartitionHints::new(3, 1), 3);

    let error =
        executor::populate_datacube(&ctx, &request, &source, false, vec![]).unwrap_err();
    match error {
        ExecutionError::PartialWriteFailure {
            code,
            rollback_complete,
        } => {
            assert_eq!(code, 13);
            assert!(rollback_complete);
        }
        other => panic!("expected PartialWriteFailure, got {other}"),
    }

    // all-or-nothing: no catalog rows and no fragment payloads survive
    assert_eq!(catalog.datacube_count(), 0);
    assert_eq!(fragment_store.fragment_count(), 0);
}

#[test]
fn rollback_deletes_fragments_written_before_the_failure() {
    // one worker, one thread: the thread writes fragment 1 ([1, 34]) before its second
    // fragment ([35, 67]) fails, so the already-written payload must be rolled back too
    let (ctx, catalog, fragment_store) = fixture();
    let ctx = ctx.with_worker_group_size(1).with_threads_per_worker(1);
    let source: Arc<dyn ArraySourceTraits> = Arc::new(FaultySource::new(100, 35, 67));
    let request = PartitionRequest::new(100, 100, PartitionHints::new(3, 1), 3);

    let error =
        executor::populate_datacube(&ctx, &request, &source, false, vec![]).unwrap_err();
    assert!(matches!(
        error,
        ExecutionError::PartialWriteFailure {
            code: 13,
            rollback_complete: true,
        }
    ));
    assert_eq!(catalog.datacube_count(), 0);
    assert_eq!(fragment_store.fragment_count(), 0);
}

#[test]
fn all_fragments_failing_reports_lowest_code() {
    let (ctx, catalog, fragment_store) = fixture();
    let source: Arc<dyn ArraySourceTraits> = Arc::new(FaultySource::new(100, 1, 100));
    let request = PartitionRequest::new(100, 100, PartitionHints::new(4, 1), 4);

    let error =
        executor::populate_datacube(&ctx, &request, &source, false, vec![]).unwrap_err();
    assert!(matches!(
        error,
        ExecutionError::PartialWriteFailure { code: 13, .. }
    ));
    assert_eq!(catalog.datacube_count(), 0);
    assert_eq!(fragment_store.fragment_count(), 0);
}

#[test]
fn infeasible_request_fails_before_any_work() {
    let (ctx, catalog, fragment_store) = fixture();
    let source: Arc<dyn ArraySourceTraits> = Arc::new(SyntheticSource::new(vec![100]));
    // 5 hosts requested but only 3 are available
    let request = PartitionRequest::new(100, 100, PartitionHints::new(5, 1), 3);

    let error =
        executor::populate_datacube(&ctx, &request, &source, false, vec![]).unwrap_err();
    assert!(matches!(error, ExecutionError::ResourceConstraint(_)));
    assert_eq!(catalog.datacube_count(), 0);
    assert_eq!(fragment_store.fragment_count(), 0);
}
