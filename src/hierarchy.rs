//! The concept-level hierarchy boundary.
//!
//! A concept level is a single character denoting a dimension's aggregation granularity.
//! The hierarchy itself (the XML-backed aggregation operator tables) is an external
//! collaborator consumed read-only; the core only stores and compares level characters.

/// The reductions available between two concept levels.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReductionSet {
    /// The aggregation operation names (e.g. `avg`, `max`).
    pub operations: Vec<String>,
    /// A bitmask identifying the aggregate rows spanned by the reduction.
    pub aggregate_set: u64,
}

/// Hierarchy traits.
pub trait HierarchyTraits: Send + Sync {
    /// Returns true if `level` exists in the hierarchy.
    fn concept_level_exists(&self, level: char) -> bool;

    /// The long name of `level`, if it exists.
    fn long_name_of(&self, level: char) -> Option<&str>;

    /// The reductions available from `from` (finer) to `to` (coarser), or [`None`] if either
    /// level is unknown or `to` is not coarser than `from`.
    fn available_reductions(&self, from: char, to: char) -> Option<ReductionSet>;
}

/// A hierarchy backed by an ordered level table, finest level first.
#[derive(Clone, Debug)]
pub struct TableHierarchy {
    levels: Vec<(char, String, Vec<String>)>,
}

impl TableHierarchy {
    /// Create a hierarchy from `(level, long_name, operations)` rows, finest level first.
    #[must_use]
    pub fn new(levels: Vec<(char, String, Vec<String>)>) -> Self {
        Self { levels }
    }

    fn position(&self, level: char) -> Option<usize> {
        self.levels.iter().position(|(l, _, _)| *l == level)
    }
}

impl HierarchyTraits for TableHierarchy {
    fn concept_level_exists(&self, level: char) -> bool {
        self.position(level).is_some()
    }

    fn long_name_of(&self, level: char) -> Option<&str> {
        self.position(level)
            .map(|position| self.levels[position].1.as_str())
    }

    fn available_reductions(&self, from: char, to: char) -> Option<ReductionSet> {
        let from = self.position(from)?;
        let to = self.position(to)?;
        if to <= from {
            return None;
        }
        let operations = self.levels[to].2.clone();
        let aggregate_set = ((from + 1)..=to).fold(0u64, |set, position| set | (1 << position));
        Some(ReductionSet {
            operations,
            aggregate_set,
        })
    }
}
