//! Failure aggregation and all-or-nothing rollback.
//!
//! Worker statuses are combined with MAX to detect failure and with MIN to select the
//! single externally visible failure code (lower codes are more specific). On failure every
//! worker's fragments are deleted (deletes are idempotent, so retries are safe) and the
//! coordinating worker removes the datacube's catalog rows. A failed cleanup is logged and
//! recorded, but never masks the original failure code.

use thiserror::Error;

use crate::{
    catalog::CatalogTraits,
    datacube::{DatacubeId, Fragment},
    materializer::{FragmentStoreTraits, MaterializeError},
};

/// The failure code reported when a worker cannot decode the plan broadcast.
pub const BROADCAST_DECODE: u32 = 20;

/// The run state of a population.
///
/// `Idle → Running → {Committed | RollingBack → RolledBack}`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RunState {
    /// No work has begun.
    Idle,
    /// Workers are populating fragments.
    Running,
    /// The datacube was committed.
    Committed,
    /// Compensating deletes are in progress.
    RollingBack,
    /// Compensating deletes finished.
    RolledBack,
}

/// A rollback failure: cleanup itself failed.
///
/// Logged but never masking the original failure code.
#[derive(Copy, Clone, Debug, Error)]
#[error("rollback failed for {_0} of {_1} cleanup actions")]
pub struct RollbackFailure(usize, usize);

/// The failure/rollback coordinator.
#[derive(Debug)]
pub struct RollbackCoordinator {
    state: RunState,
}

impl RollbackCoordinator {
    /// Create an idle coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
        }
    }

    /// The current run state.
    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Enter the running state.
    pub fn start(&mut self) {
        debug_assert_eq!(self.state, RunState::Idle);
        self.state = RunState::Running;
    }

    /// Enter the committed state.
    pub fn commit(&mut self) {
        debug_assert_eq!(self.state, RunState::Running);
        self.state = RunState::Committed;
    }

    /// Delete the fragments written so far and the datacube's catalog rows.
    ///
    /// Deletes are idempotent, so a retried rollback (or a rollback racing a worker's
    /// partial write) converges to the same clean state.
    ///
    /// # Errors
    /// Returns a [`RollbackFailure`] if any cleanup action failed; the failure is also
    /// logged. Callers still report the original failure code.
    pub fn rollback(
        &mut self,
        catalog: &dyn CatalogTraits,
        store: &dyn FragmentStoreTraits,
        datacube_id: DatacubeId,
        fragments: &[Fragment],
    ) -> Result<(), RollbackFailure> {
        debug_assert_eq!(self.state, RunState::Running);
        self.state = RunState::RollingBack;
        tracing::debug!(datacube = %datacube_id, fragments = fragments.len(), "rolling back");

        let mut failures = 0;
        for fragment in fragments {
            if let Err(error) = store.delete(&fragment.name) {
                tracing::warn!(fragment = %fragment.name, %error, "fragment delete failed");
                failures += 1;
            }
        }
        if let Err(error) = catalog.delete_datacube(datacube_id) {
            tracing::warn!(datacube = %datacube_id, %error, "catalog delete failed");
            failures += 1;
        }

        self.state = RunState::RolledBack;
        if failures == 0 {
            Ok(())
        } else {
            Err(RollbackFailure(failures, fragments.len() + 1))
        }
    }
}

impl Default for RollbackCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Combine worker statuses with MAX: nonzero if any worker failed.
pub fn reduce_status_max(statuses: impl Iterator<Item = u32>) -> u32 {
    statuses.max().unwrap_or(0)
}

/// Combine worker failure codes with MIN over the nonzero values: the lowest (most
/// specific) code wins. Returns 0 if no worker failed.
pub fn reduce_code_min(codes: impl Iterator<Item = u32>) -> u32 {
    codes.filter(|&code| code != 0).min().unwrap_or(0)
}

/// The specific failure code of a materialisation error.
///
/// Lower codes are more specific and win the MIN reduction.
#[must_use]
pub fn error_code(error: &MaterializeError) -> u32 {
    match error {
        MaterializeError::TypeMismatch(_) => 11,
        MaterializeError::ShortRead(_, _) => 12,
        MaterializeError::Source(_) => 13,
        MaterializeError::Store(_) => 14,
        MaterializeError::Compression(_) | MaterializeError::CompressionUnsupported => 15,
    }
}
