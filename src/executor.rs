//! The two-tier concurrent execution protocol.
//!
//! Population runs on two nested tiers of parallel, non-cooperative workers: an outer
//! worker group (scoped threads, joined before return) and an inner fixed-size concurrency
//! limit per worker. Coordination is limited to two collectives: the broadcast of the
//! planner's decision as a [`PlanEnvelope`], and the terminal status reductions (MAX to
//! detect failure, MIN to select the single externally visible error code). Between the
//! two, every worker derives its fragment sub-range deterministically from the plan and its
//! rank; no work queue exists.

pub mod rollback;

use std::sync::Arc;

use itertools::Either;
use rayon::iter::{IndexedParallelIterator, IntoParallelIterator, ParallelIterator};
use rayon_iter_concurrent_limit::iter_concurrent_limit;
use thiserror::Error;

use crate::{
    catalog::{CatalogError, CatalogTraits},
    config::global_config,
    datacube::{Datacube, DatacubeId, Fragment},
    dimension::{
        data_type::DimensionDataType, store::IndexLabelStoreTraits, DimensionInstance,
        DimensionValidationError,
    },
    distribution::{PlanEnvelope, WorkerAssignment},
    fragment_id_set::FragmentIdSet,
    materializer::{self, FragmentStoreTraits, MaterializeError, Row},
    partition::{FragmentSlots, PartitionRequest, ResourceConstraintError, SlotPolicy},
    source::ArraySourceTraits,
};

use rollback::{
    error_code, reduce_code_min, reduce_status_max, RollbackCoordinator, BROADCAST_DECODE,
};

/// An execution error.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The requested topology is infeasible; no work began.
    #[error(transparent)]
    ResourceConstraint(#[from] ResourceConstraintError),
    /// A dimension instance failed validation; no work began.
    #[error(transparent)]
    Dimension(#[from] DimensionValidationError),
    /// A catalog failure on the commit path.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    /// A materialisation failure on the read path.
    #[error(transparent)]
    Materialize(#[from] MaterializeError),
    /// One or more workers failed during population.
    ///
    /// The code is the MIN-selected (most specific) failure code across all workers.
    /// `rollback_complete` records whether every compensating delete succeeded; a failed
    /// cleanup is logged but never masks this error.
    #[error("fragment population failed with code {code} (rollback complete: {rollback_complete})")]
    PartialWriteFailure {
        /// The most specific failure code across all workers.
        code: u32,
        /// Whether all compensating deletes succeeded.
        rollback_complete: bool,
    },
}

/// The explicit context threaded through planner, allocator, and materializer calls.
///
/// Holds the shared collaborators of a run; there is no process-wide mutable operator state.
#[derive(Clone)]
pub struct ExecutionContext {
    /// The relational catalog.
    pub catalog: Arc<dyn CatalogTraits>,
    /// The backing fragment row store.
    pub fragment_store: Arc<dyn FragmentStoreTraits>,
    /// The dimension index/label store.
    pub dimension_store: Arc<dyn IndexLabelStoreTraits>,
    /// The database slot assignment policy.
    pub slot_policy: SlotPolicy,
    /// The outer worker group size.
    pub worker_group_size: u64,
    /// The inner thread pool size per worker.
    pub threads_per_worker: u64,
}

impl ExecutionContext {
    /// Create an execution context with tier sizes from the
    /// [global configuration](crate::config).
    #[must_use]
    pub fn new(
        catalog: Arc<dyn CatalogTraits>,
        fragment_store: Arc<dyn FragmentStoreTraits>,
        dimension_store: Arc<dyn IndexLabelStoreTraits>,
    ) -> Self {
        let config = global_config();
        Self {
            catalog,
            fragment_store,
            dimension_store,
            slot_policy: SlotPolicy::default(),
            worker_group_size: config.worker_group_size(),
            threads_per_worker: config.threads_per_worker(),
        }
    }

    /// Set the slot policy.
    #[must_use]
    pub fn with_slot_policy(mut self, slot_policy: SlotPolicy) -> Self {
        self.slot_policy = slot_policy;
        self
    }

    /// Set the outer worker group size.
    #[must_use]
    pub fn with_worker_group_size(mut self, worker_group_size: u64) -> Self {
        self.worker_group_size = std::cmp::max(1, worker_group_size);
        self
    }

    /// Set the inner thread pool size per worker.
    #[must_use]
    pub fn with_threads_per_worker(mut self, threads_per_worker: u64) -> Self {
        self.threads_per_worker = std::cmp::max(1, threads_per_worker);
        self
    }
}

/// One worker's local result, reported at the terminal collectives.
#[derive(Debug)]
struct WorkerOutcome {
    status: u32,
    fragments: Vec<Fragment>,
}

/// Create and populate a datacube from `source`, all-or-nothing.
///
/// The coordinating worker plans once, writes the datacube and dimension rows, and
/// broadcasts the plan; the worker group populates its deterministic fragment sub-ranges;
/// the coordinating worker commits the fragment rows, or rolls everything back on any
/// worker failure.
///
/// # Errors
/// Returns an [`ExecutionError`]: planner errors fail fast before any work begins;
/// population failures surface as [`ExecutionError::PartialWriteFailure`] carrying the
/// MIN-selected failure code after rollback.
///
/// # Panics
/// Panics if a worker thread panics.
pub fn populate_datacube(
    ctx: &ExecutionContext,
    request: &PartitionRequest,
    source: &Arc<dyn ArraySourceTraits>,
    compressed: bool,
    dimension_instances: Vec<DimensionInstance>,
) -> Result<Datacube, ExecutionError> {
    let mut coordinator = RollbackCoordinator::new();
    let plan = request.plan()?;
    for instance in &dimension_instances {
        instance.validate(ctx.dimension_store.as_ref())?;
    }
    let broadcast = PlanEnvelope::new(plan.clone()).to_bytes();
    let measure_type = source.data_type();

    // the datacube row exists before population so fragments carry its id; it is removed
    // again on rollback
    let datacube_id = ctx.catalog.insert_datacube(Datacube {
        id: DatacubeId(0),
        total_fragment_count: plan.total_fragment_count,
        host_number: plan.host_number,
        fragments_per_db: plan.fragments_per_db,
        tuples_per_fragment: plan.tuples_per_fragment,
        compressed,
        measure_type,
        fragment_id_set: FragmentIdSet::from_range(1, plan.total_fragment_count),
    })?;
    ctx.catalog
        .insert_dimension_instances(datacube_id, dimension_instances)?;
    coordinator.start();

    let group_size = std::cmp::max(1, ctx.worker_group_size);
    let thread_count = std::cmp::max(1, ctx.threads_per_worker);

    tracing::debug!(
        datacube = %datacube_id,
        total_fragments = plan.total_fragment_count,
        group_size,
        thread_count,
        "populating datacube"
    );

    let outcomes: Vec<WorkerOutcome> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..group_size)
            .map(|rank| {
                let broadcast = broadcast.as_slice();
                scope.spawn(move || {
                    run_worker(
                        ctx,
                        broadcast,
                        rank,
                        group_size,
                        thread_count,
                        datacube_id,
                        measure_type,
                        compressed,
                        source.as_ref(),
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker thread panicked"))
            .collect()
    });

    // terminal collectives: MAX detects failure, MIN selects the visible code
    let failed = reduce_status_max(outcomes.iter().map(|outcome| outcome.status)) != 0;
    let code = reduce_code_min(outcomes.iter().map(|outcome| outcome.status));
    let fragments: Vec<Fragment> = outcomes
        .into_iter()
        .flat_map(|outcome| outcome.fragments)
        .collect();

    if failed {
        let rollback_complete = coordinator
            .rollback(
                ctx.catalog.as_ref(),
                ctx.fragment_store.as_ref(),
                datacube_id,
                &fragments,
            )
            .is_ok();
        return Err(ExecutionError::PartialWriteFailure {
            code,
            rollback_complete,
        });
    }

    // commit path: only the coordinating worker writes fragment rows
    ctx.catalog.insert_fragments(fragments)?;
    coordinator.commit();
    tracing::debug!(datacube = %datacube_id, "datacube committed");
    Ok(ctx.catalog.get_datacube(datacube_id)?)
}

/// Run one outer worker: decode the broadcast, derive the fragment sub-range, and populate
/// it with the inner tier. Errors stay local until the terminal collectives.
#[allow(clippy::too_many_arguments)]
fn run_worker(
    ctx: &ExecutionContext,
    broadcast: &[u8],
    rank: u64,
    group_size: u64,
    thread_count: u64,
    datacube_id: DatacubeId,
    measure_type: DimensionDataType,
    compressed: bool,
    source: &dyn ArraySourceTraits,
) -> WorkerOutcome {
    // every worker decodes the identical broadcast rather than recomputing the plan
    let Ok(plan) = PlanEnvelope::decode(broadcast) else {
        return WorkerOutcome {
            status: BROADCAST_DECODE,
            fragments: Vec::new(),
        };
    };
    let assignment = WorkerAssignment::new(plan.total_fragment_count, group_size, rank);

    let ranges: Vec<(u64, u64)> = (0..thread_count)
        .map(|thread_index| assignment.thread_range(thread_count, thread_index))
        .collect();
    let thread_limit = usize::try_from(thread_count).unwrap();
    let results: Vec<(Vec<Fragment>, u32)> = iter_concurrent_limit!(
        thread_limit,
        ranges,
        map,
        |(first_relative_index, fragment_count): (u64, u64)| {
            let slots = FragmentSlots::new_with_range(
                plan.clone(),
                ctx.slot_policy.clone(),
                first_relative_index,
                fragment_count,
            );
            let mut fragments = Vec::with_capacity(slots.len());
            for slot in &slots {
                match materializer::populate(
                    &slot,
                    datacube_id,
                    measure_type,
                    compressed,
                    source,
                    ctx.fragment_store.as_ref(),
                ) {
                    Ok(fragment) => fragments.push(fragment),
                    Err(error) => {
                        tracing::debug!(
                            rank,
                            fragment = slot.relative_index,
                            %error,
                            "fragment population failed"
                        );
                        // fragments written before the failure are reported so rollback
                        // can delete them
                        return (fragments, error_code(&error));
                    }
                }
            }
            (fragments, 0)
        }
    )
    .collect();

    let mut fragments = Vec::new();
    let mut codes = Vec::new();
    for (thread_fragments, code) in results {
        fragments.extend(thread_fragments);
        if code != 0 {
            codes.push(code);
        }
    }
    WorkerOutcome {
        status: reduce_code_min(codes.into_iter()),
        fragments,
    }
}

/// Read all rows of a datacube lazily, fragment by fragment in relative-index order.
///
/// A fragment's payload is fetched and decoded only when the scan reaches it, so a scan of
/// the first rows never touches the later fragments. A per-fragment read failure surfaces
/// as an [`Err`] item in place of that fragment's rows.
///
/// # Errors
/// Returns an [`ExecutionError`] if the datacube is unknown.
pub fn scan_datacube(
    ctx: &ExecutionContext,
    datacube_id: DatacubeId,
) -> Result<impl Iterator<Item = Result<Row, ExecutionError>>, ExecutionError> {
    let datacube = ctx.catalog.get_datacube(datacube_id)?;
    let mut fragments = ctx.catalog.list_fragments(datacube_id)?;
    fragments.sort_by_key(|fragment| fragment.relative_index);
    let explicit_sizes: Vec<u64> = ctx
        .catalog
        .list_dimension_instances(datacube_id)?
        .iter()
        .map(|instance| instance.size)
        .collect();
    let store = ctx.fragment_store.clone();
    Ok(fragments.into_iter().flat_map(move |fragment| {
        match materializer::read(
            &fragment,
            &explicit_sizes,
            datacube.measure_type,
            datacube.compressed,
            store.as_ref(),
        ) {
            Ok(rows) => Either::Left(rows.map(Ok)),
            Err(error) => Either::Right(std::iter::once(Err(ExecutionError::Materialize(error)))),
        }
    }))
}
