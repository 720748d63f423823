//! The partition planner.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A resource constraint error.
///
/// Raised when the requested topology is infeasible before any work begins.
#[derive(Clone, Debug, Error)]
pub enum ResourceConstraintError {
    /// More hosts were requested than are available.
    #[error("requested {_0} hosts but only {_1} are available")]
    InsufficientHosts(u64, u64),
    /// No hosts are available.
    #[error("no hosts are available")]
    NoHosts,
    /// The array has no rows to partition.
    #[error("cannot partition an array with logical row count {_0} and explicit row count {_1}")]
    EmptyArray(u64, u64),
    /// The partition leaves at least one fragment without any tuples.
    #[error("{_0} fragments over {_1} logical rows leaves empty fragments")]
    EmptyFragments(u64, u64),
}

/// Resource hints accepted from the caller.
///
/// A value of `0` means "unset, use the default".
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct PartitionHints {
    /// The requested number of hosts.
    pub requested_hosts: u64,
    /// The requested number of fragments per database slot.
    pub requested_fragments_per_db: u64,
}

impl PartitionHints {
    /// Create partition hints. `0` leaves a value unset.
    #[must_use]
    pub const fn new(requested_hosts: u64, requested_fragments_per_db: u64) -> Self {
        Self {
            requested_hosts,
            requested_fragments_per_db,
        }
    }
}

/// A fragmentation plan.
///
/// Produced once by the coordinating worker and broadcast to the worker group as a
/// [`PlanEnvelope`](crate::distribution::PlanEnvelope).
/// All downstream fragment/key-range/worker assignments derive deterministically from it.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// The total number of logical rows, including implicit dimensions.
    pub logical_row_count: u64,
    /// The number of rows determined by explicit dimensions.
    pub explicit_row_count: u64,
    /// The number of hosts receiving fragments.
    pub host_number: u64,
    /// The number of fragments assigned to each database slot.
    pub fragments_per_db: u64,
    /// The baseline number of tuples per fragment.
    pub tuples_per_fragment: u64,
    /// The total number of fragments, `host_number * fragments_per_db`.
    pub total_fragment_count: u64,
    /// The number of leading fragments (by relative index) holding one extra tuple.
    pub uneven_tail: u64,
    /// Whether the planner adjusted the requested topology to avoid truncating data.
    pub adjusted: bool,
}

/// A partition request: array row counts, resource hints, and the available host pool.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PartitionRequest {
    /// The total number of logical rows.
    pub logical_row_count: u64,
    /// The number of rows determined by explicit dimensions.
    pub explicit_row_count: u64,
    /// Caller resource hints.
    pub hints: PartitionHints,
    /// The number of hosts available in the pool.
    pub available_hosts: u64,
}

impl PartitionRequest {
    /// Create a new partition request.
    #[must_use]
    pub const fn new(
        logical_row_count: u64,
        explicit_row_count: u64,
        hints: PartitionHints,
        available_hosts: u64,
    ) -> Self {
        Self {
            logical_row_count,
            explicit_row_count,
            hints,
            available_hosts,
        }
    }

    /// Compute the fragmentation plan.
    ///
    /// - With no hints, hosts default to `min(available_hosts, explicit_row_count)` and the
    ///   explicit rows are divided evenly with `fragments_per_db = ceil(explicit / hosts)`.
    /// - With exactly one hint set, the other factor is solved under
    ///   `explicit_row_count % (hosts * fragments_per_db) == 0`; if no exact solution exists
    ///   the planner falls back to the divisor of `available_hosts` nearest the ideal host
    ///   count and flags the plan as [`adjusted`](Plan::adjusted). Rows are never truncated.
    /// - With both hints set, `hosts * fragments_per_db` may undershoot the explicit row
    ///   count; tuples per fragment grow proportionally and the remainder becomes the
    ///   [`uneven_tail`](Plan::uneven_tail): the first `uneven_tail` fragments hold exactly
    ///   one extra tuple.
    ///
    /// # Errors
    /// Returns a [`ResourceConstraintError`] if more hosts are requested than available, the
    /// array is empty, or the resulting layout leaves empty fragments.
    pub fn plan(&self) -> Result<Plan, ResourceConstraintError> {
        if self.available_hosts == 0 {
            return Err(ResourceConstraintError::NoHosts);
        }
        if self.logical_row_count == 0 || self.explicit_row_count == 0 {
            return Err(ResourceConstraintError::EmptyArray(
                self.logical_row_count,
                self.explicit_row_count,
            ));
        }
        if self.hints.requested_hosts > self.available_hosts {
            return Err(ResourceConstraintError::InsufficientHosts(
                self.hints.requested_hosts,
                self.available_hosts,
            ));
        }

        let explicit = self.explicit_row_count;
        let (host_number, fragments_per_db, adjusted) = match (
            self.hints.requested_hosts,
            self.hints.requested_fragments_per_db,
        ) {
            (0, 0) => {
                let hosts = std::cmp::min(self.available_hosts, explicit);
                (hosts, explicit.div_ceil(hosts), false)
            }
            (hosts, 0) => {
                if explicit % hosts == 0 {
                    (hosts, explicit / hosts, false)
                } else {
                    let hosts = nearest_divisor(self.available_hosts, hosts);
                    (hosts, explicit.div_ceil(hosts), true)
                }
            }
            (0, fragments_per_db) => {
                let ideal = explicit.div_ceil(fragments_per_db);
                if ideal <= self.available_hosts && explicit % (ideal * fragments_per_db) == 0 {
                    (ideal, fragments_per_db, false)
                } else {
                    (
                        nearest_divisor(self.available_hosts, ideal),
                        fragments_per_db,
                        true,
                    )
                }
            }
            (hosts, fragments_per_db) => (hosts, fragments_per_db, false),
        };

        let total_fragment_count = host_number * fragments_per_db;
        let tuples_per_fragment = self.logical_row_count / total_fragment_count;
        if tuples_per_fragment == 0 {
            return Err(ResourceConstraintError::EmptyFragments(
                total_fragment_count,
                self.logical_row_count,
            ));
        }
        let uneven_tail = self.logical_row_count % total_fragment_count;

        Ok(Plan {
            logical_row_count: self.logical_row_count,
            explicit_row_count: explicit,
            host_number,
            fragments_per_db,
            tuples_per_fragment,
            total_fragment_count,
            uneven_tail,
            adjusted,
        })
    }

    /// Compute the fragmentation plan without committing it.
    ///
    /// Behaviour is identical to [`plan`](Self::plan). Planning is a pure computation; the
    /// side effects (catalog rows) belong to the executor, so dry-run tooling can inspect the
    /// returned plan and discard it.
    ///
    /// # Errors
    /// See [`plan`](Self::plan).
    pub fn simulate(&self) -> Result<Plan, ResourceConstraintError> {
        self.plan()
    }
}

/// The divisor of `n` nearest to `target`, preferring the larger divisor on ties.
fn nearest_divisor(n: u64, target: u64) -> u64 {
    debug_assert!(n > 0);
    (1..=n)
        .filter(|divisor| n % divisor == 0)
        .min_by_key(|&divisor| (divisor.abs_diff(target), std::cmp::Reverse(divisor)))
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_default_hints() {
        let plan = PartitionRequest::new(1000, 10, PartitionHints::default(), 4)
            .plan()
            .unwrap();
        assert_eq!(plan.host_number, 4);
        assert_eq!(plan.fragments_per_db, 3); // ceil(10 / 4)
        assert_eq!(plan.total_fragment_count, 12);
        assert_eq!(plan.tuples_per_fragment, 83);
        assert_eq!(plan.uneven_tail, 4);
        assert!(!plan.adjusted);
    }

    #[test]
    fn plan_default_hints_few_rows() {
        // fewer explicit rows than hosts
        let plan = PartitionRequest::new(300, 3, PartitionHints::default(), 16)
            .plan()
            .unwrap();
        assert_eq!(plan.host_number, 3);
        assert_eq!(plan.fragments_per_db, 1);
        assert_eq!(plan.tuples_per_fragment, 100);
        assert_eq!(plan.uneven_tail, 0);
    }

    #[test]
    fn plan_hosts_hint_exact() {
        let plan = PartitionRequest::new(120, 12, PartitionHints::new(4, 0), 8)
            .plan()
            .unwrap();
        assert_eq!(plan.host_number, 4);
        assert_eq!(plan.fragments_per_db, 3);
        assert!(!plan.adjusted);
    }

    #[test]
    fn plan_hosts_hint_adjusted() {
        // 7 does not divide 12; falls back to the divisor of 8 nearest to 7
        let plan = PartitionRequest::new(120, 12, PartitionHints::new(7, 0), 8)
            .plan()
            .unwrap();
        assert_eq!(plan.host_number, 8);
        assert_eq!(plan.fragments_per_db, 2);
        assert!(plan.adjusted);
        // no rows truncated
        assert!(plan.total_fragment_count * plan.tuples_per_fragment + plan.uneven_tail >= 120);
    }

    #[test]
    fn plan_fragments_hint_exact() {
        let plan = PartitionRequest::new(240, 12, PartitionHints::new(0, 3), 8)
            .plan()
            .unwrap();
        assert_eq!(plan.host_number, 4);
        assert_eq!(plan.fragments_per_db, 3);
        assert!(!plan.adjusted);
    }

    #[test]
    fn plan_fragments_hint_adjusted() {
        // ideal host count 5 does not satisfy the exact constraint for 13 explicit rows
        let plan = PartitionRequest::new(130, 13, PartitionHints::new(0, 3), 8)
            .plan()
            .unwrap();
        assert_eq!(plan.fragments_per_db, 3);
        assert_eq!(plan.host_number, 4); // divisor of 8 nearest 5
        assert!(plan.adjusted);
    }

    #[test]
    fn plan_both_hints_uneven_tail() {
        let plan = PartitionRequest::new(100, 100, PartitionHints::new(3, 1), 3)
            .plan()
            .unwrap();
        assert_eq!(plan.total_fragment_count, 3);
        assert_eq!(plan.tuples_per_fragment, 33);
        assert_eq!(plan.uneven_tail, 1);
    }

    #[test]
    fn plan_insufficient_hosts() {
        let err = PartitionRequest::new(100, 10, PartitionHints::new(5, 1), 3)
            .plan()
            .unwrap_err();
        assert!(matches!(
            err,
            ResourceConstraintError::InsufficientHosts(5, 3)
        ));
    }

    #[test]
    fn plan_empty_fragments() {
        // 4 * 4 = 16 fragments over 10 rows
        assert!(matches!(
            PartitionRequest::new(10, 10, PartitionHints::new(4, 4), 4).plan(),
            Err(ResourceConstraintError::EmptyFragments(16, 10))
        ));
    }

    #[test]
    fn plan_empty_array() {
        assert!(PartitionRequest::new(0, 0, PartitionHints::default(), 4)
            .plan()
            .is_err());
    }

    #[test]
    fn simulate_matches_plan() {
        let request = PartitionRequest::new(1000, 10, PartitionHints::new(2, 0), 4);
        assert_eq!(request.simulate().unwrap(), request.plan().unwrap());
    }

    #[test]
    fn nearest_divisor_prefers_larger_on_tie() {
        assert_eq!(nearest_divisor(8, 3), 4);
        assert_eq!(nearest_divisor(8, 7), 8);
        assert_eq!(nearest_divisor(12, 5), 6);
        assert_eq!(nearest_divisor(7, 3), 1);
    }
}
