//! Deterministic work distribution across the two worker tiers.
//!
//! After the coordinating worker broadcasts the [`Plan`] (as a versioned [`PlanEnvelope`]),
//! every worker derives its fragment sub-range purely from
//! `(total_fragment_count, group_size, rank)`, and every thread sub-divides its worker's
//! range by the identical formula. No work queue and no cross-worker messages exist between
//! the broadcast and the terminal status reductions: workers compute, they don't ask.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::partition::Plan;

/// The current plan envelope format version.
pub const PLAN_ENVELOPE_VERSION: u32 = 1;

/// A plan envelope error.
#[derive(Clone, Debug, Error)]
pub enum PlanEnvelopeError {
    /// The envelope's format version is not understood.
    #[error("unsupported plan envelope version {_0}, expected {PLAN_ENVELOPE_VERSION}")]
    UnsupportedVersion(u32),
    /// The envelope body is not valid.
    #[error("invalid plan envelope: {_0}")]
    Invalid(String),
}

/// A versioned serialization of a [`Plan`] for the broadcast collective.
///
/// The plan crosses worker-process boundaries as explicit, versioned JSON; identical memory
/// layout across processes is never assumed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlanEnvelope {
    version: u32,
    plan: Plan,
}

impl PlanEnvelope {
    /// Wrap a plan for broadcast.
    #[must_use]
    pub fn new(plan: Plan) -> Self {
        Self {
            version: PLAN_ENVELOPE_VERSION,
            plan,
        }
    }

    /// Serialise the envelope to bytes.
    ///
    /// # Panics
    /// Panics if JSON serialisation of the plan fails, which cannot happen for a valid plan.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap()
    }

    /// Deserialise an envelope and unwrap the plan.
    ///
    /// # Errors
    /// Returns a [`PlanEnvelopeError`] if the bytes are not a valid envelope or the version
    /// is not understood.
    pub fn decode(bytes: &[u8]) -> Result<Plan, PlanEnvelopeError> {
        let envelope: Self = serde_json::from_slice(bytes)
            .map_err(|err| PlanEnvelopeError::Invalid(err.to_string()))?;
        if envelope.version != PLAN_ENVELOPE_VERSION {
            return Err(PlanEnvelopeError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope.plan)
    }
}

/// Split `n_items` across `n_parts` and return the `(start_offset, count)` of `part`
/// (0-based offsets).
///
/// The first `n_items % n_parts` parts receive one extra item, so parts differ in size by at
/// most 1 and sum exactly to `n_items`. This is the same rule the key-range allocator uses
/// for the uneven tail.
///
/// # Panics
/// Panics if `n_parts` is zero or `part >= n_parts`.
#[must_use]
pub fn even_split(n_items: u64, n_parts: u64, part: u64) -> (u64, u64) {
    assert!(n_parts > 0 && part < n_parts);
    let base = n_items / n_parts;
    let remainder = n_items % n_parts;
    let count = base + u64::from(part < remainder);
    let start = part * base + std::cmp::min(part, remainder);
    (start, count)
}

/// One outer worker's share of the fragment space.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct WorkerAssignment {
    /// The worker's rank in the group (0-based).
    pub rank: u64,
    /// The size of the worker group.
    pub group_size: u64,
    /// The first fragment of the worker's range (1-based relative index).
    pub first_relative_index: u64,
    /// The number of fragments assigned to the worker.
    pub fragment_count: u64,
}

impl WorkerAssignment {
    /// Derive the assignment of the worker with `rank` in a group of `group_size` over
    /// `total_fragment_count` fragments.
    ///
    /// # Panics
    /// Panics if `group_size` is zero or `rank >= group_size`.
    #[must_use]
    pub fn new(total_fragment_count: u64, group_size: u64, rank: u64) -> Self {
        let (start, count) = even_split(total_fragment_count, group_size, rank);
        Self {
            rank,
            group_size,
            first_relative_index: start + 1,
            fragment_count: count,
        }
    }

    /// Sub-divide this worker's range for the thread with `thread_index` in a pool of
    /// `thread_count`, by the identical even-split rule.
    ///
    /// Returns the `(first_relative_index, fragment_count)` of the thread's range.
    ///
    /// # Panics
    /// Panics if `thread_count` is zero or `thread_index >= thread_count`.
    #[must_use]
    pub fn thread_range(&self, thread_count: u64, thread_index: u64) -> (u64, u64) {
        let (start, count) = even_split(self.fragment_count, thread_count, thread_index);
        (self.first_relative_index + start, count)
    }
}
