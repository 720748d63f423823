//! The fragment key-range allocator.

use std::iter::FusedIterator;

use rayon::iter::{
    plumbing::{bridge, Consumer, Producer, ProducerCallback, UnindexedConsumer},
    IndexedParallelIterator, IntoParallelIterator, ParallelIterator,
};

use super::{Plan, SlotPolicy};

/// A fragment slot: one fragment's position in the layout and its key range.
///
/// Slot `i` (1-based) owns the contiguous keys `[key_start, key_end]`; over all slots of a
/// plan the ranges are pairwise disjoint and union to `[1, logical_row_count]`.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct FragmentSlot {
    /// The 1-based, dense fragment-relative index.
    pub relative_index: u64,
    /// The database slot (host/db pair) receiving the fragment.
    pub db_slot: u64,
    /// The number of tuples in the fragment.
    pub tuples_in_fragment: u64,
    /// The first key of the fragment (inclusive).
    pub key_start: u64,
    /// The last key of the fragment (inclusive).
    pub key_end: u64,
}

impl FragmentSlot {
    /// Compute the slot with 1-based `relative_index` in `plan`.
    ///
    /// Key ranges are in closed form, so any slot is computed without visiting its
    /// predecessors: the first [`uneven_tail`](Plan::uneven_tail) slots hold one extra tuple.
    ///
    /// # Panics
    /// Panics if `relative_index` is not in `[1, plan.total_fragment_count]`.
    #[must_use]
    pub fn new(plan: &Plan, policy: &SlotPolicy, relative_index: u64) -> Self {
        assert!(relative_index >= 1 && relative_index <= plan.total_fragment_count);
        let tuples_in_fragment =
            plan.tuples_per_fragment + u64::from(relative_index <= plan.uneven_tail);
        let key_start = 1
            + (relative_index - 1) * plan.tuples_per_fragment
            + std::cmp::min(relative_index - 1, plan.uneven_tail);
        Self {
            relative_index,
            db_slot: policy.db_slot(relative_index, plan),
            tuples_in_fragment,
            key_start,
            key_end: key_start + tuples_in_fragment - 1,
        }
    }
}

/// A lazy, finite, restartable sequence of the [`FragmentSlot`]s of a [`Plan`].
///
/// Supports serial iteration with [`iter`](FragmentSlots::iter) and parallel iteration with
/// [`into_par_iter`](IntoParallelIterator::into_par_iter). Restart by iterating again;
/// producing a slot has no side effects.
#[derive(Clone, Debug)]
pub struct FragmentSlots {
    plan: Plan,
    policy: SlotPolicy,
    index_front: u64,
    index_back: u64,
    length: usize,
}

impl FragmentSlots {
    /// Create a new fragment slot sequence over all slots of `plan`.
    ///
    /// # Panics
    /// Panics if the total fragment count exceeds [`usize::MAX`].
    #[must_use]
    pub fn new(plan: Plan, policy: SlotPolicy) -> Self {
        let length = usize::try_from(plan.total_fragment_count).unwrap();
        Self {
            index_front: 0,
            index_back: plan.total_fragment_count,
            plan,
            policy,
            length,
        }
    }

    /// Create a new fragment slot sequence over the sub-range of slots with 1-based relative
    /// indices `[first_relative_index, first_relative_index + count)`.
    ///
    /// This is the worker/thread view of the slot space: each tier iterates only the slots
    /// its even split assigned to it.
    ///
    /// # Panics
    /// Panics if the sub-range exceeds the total fragment count.
    #[must_use]
    pub fn new_with_range(
        plan: Plan,
        policy: SlotPolicy,
        first_relative_index: u64,
        count: u64,
    ) -> Self {
        assert!(first_relative_index >= 1);
        assert!(first_relative_index + count <= plan.total_fragment_count + 1);
        let length = usize::try_from(count).unwrap();
        Self {
            index_front: first_relative_index - 1,
            index_back: first_relative_index - 1 + count,
            plan,
            policy,
            length,
        }
    }

    /// Return the number of slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns true if the number of slots is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The plan the slots are allocated from.
    #[must_use]
    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Create a new serial iterator.
    #[must_use]
    pub fn iter(&self) -> FragmentSlotsIterator<'_> {
        <&Self as IntoIterator>::into_iter(self)
    }
}

impl<'a> IntoIterator for &'a FragmentSlots {
    type Item = FragmentSlot;
    type IntoIter = FragmentSlotsIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        FragmentSlotsIterator {
            plan: &self.plan,
            policy: &self.policy,
            index_front: self.index_front,
            index_back: self.index_back,
        }
    }
}

impl<'a> IntoParallelIterator for &'a FragmentSlots {
    type Item = FragmentSlot;
    type Iter = ParFragmentSlotsIterator<'a>;

    fn into_par_iter(self) -> Self::Iter {
        ParFragmentSlotsIterator {
            plan: &self.plan,
            policy: &self.policy,
            index_front: self.index_front,
            index_back: self.index_back,
        }
    }
}

/// Serial fragment slots iterator.
///
/// See [`FragmentSlots`].
pub struct FragmentSlotsIterator<'a> {
    plan: &'a Plan,
    policy: &'a SlotPolicy,
    index_front: u64,
    index_back: u64,
}

impl Iterator for FragmentSlotsIterator<'_> {
    type Item = FragmentSlot;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index_front < self.index_back {
            self.index_front += 1;
            Some(FragmentSlot::new(self.plan, self.policy, self.index_front))
        } else {
            None
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let length = usize::try_from(self.index_back - self.index_front).unwrap();
        (length, Some(length))
    }
}

impl DoubleEndedIterator for FragmentSlotsIterator<'_> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.index_back > self.index_front {
            let slot = FragmentSlot::new(self.plan, self.policy, self.index_back);
            self.index_back -= 1;
            Some(slot)
        } else {
            None
        }
    }
}

impl ExactSizeIterator for FragmentSlotsIterator<'_> {}

impl FusedIterator for FragmentSlotsIterator<'_> {}

/// Parallel fragment slots iterator.
///
/// See [`FragmentSlots`].
pub struct ParFragmentSlotsIterator<'a> {
    plan: &'a Plan,
    policy: &'a SlotPolicy,
    index_front: u64,
    index_back: u64,
}

impl ParallelIterator for ParFragmentSlotsIterator<'_> {
    type Item = FragmentSlot;

    fn drive_unindexed<C>(self, consumer: C) -> C::Result
    where
        C: UnindexedConsumer<Self::Item>,
    {
        bridge(self, consumer)
    }

    fn opt_len(&self) -> Option<usize> {
        Some(self.len())
    }
}

impl IndexedParallelIterator for ParFragmentSlotsIterator<'_> {
    fn with_producer<CB: ProducerCallback<Self::Item>>(self, callback: CB) -> CB::Output {
        let producer = ParFragmentSlotsIteratorProducer::from(&self);
        callback.callback(producer)
    }

    fn drive<C: Consumer<Self::Item>>(self, consumer: C) -> C::Result {
        bridge(self, consumer)
    }

    fn len(&self) -> usize {
        usize::try_from(self.index_back - self.index_front).unwrap()
    }
}

#[derive(Debug)]
struct ParFragmentSlotsIteratorProducer<'a> {
    plan: &'a Plan,
    policy: &'a SlotPolicy,
    index_front: u64,
    index_back: u64,
}

impl<'a> Producer for ParFragmentSlotsIteratorProducer<'a> {
    type Item = FragmentSlot;
    type IntoIter = FragmentSlotsIterator<'a>;

    fn into_iter(self) -> Self::IntoIter {
        FragmentSlotsIterator {
            plan: self.plan,
            policy: self.policy,
            index_front: self.index_front,
            index_back: self.index_back,
        }
    }

    fn split_at(self, index: usize) -> (Self, Self) {
        let left = ParFragmentSlotsIteratorProducer {
            plan: self.plan,
            policy: self.policy,
            index_front: self.index_front,
            index_back: self.index_front + index as u64,
        };
        let right = ParFragmentSlotsIteratorProducer {
            plan: self.plan,
            policy: self.policy,
            index_front: self.index_front + index as u64,
            index_back: self.index_back,
        };
        (left, right)
    }
}

impl<'a> From<&'a ParFragmentSlotsIterator<'_>> for ParFragmentSlotsIteratorProducer<'a> {
    fn from(iterator: &'a ParFragmentSlotsIterator<'_>) -> Self {
        Self {
            plan: iterator.plan,
            policy: iterator.policy,
            index_front: iterator.index_front,
            index_back: iterator.index_back,
        }
    }
}
