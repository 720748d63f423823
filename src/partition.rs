//! Datacube partitioning.
//!
//! The [partition planner](planner) turns an array's row counts and optional resource hints
//! into a [`Plan`]: a fragment/host layout with a fixed tuples-per-fragment baseline and an
//! uneven tail. The [key-range allocator](key_range) expands a plan into a lazy sequence of
//! [`FragmentSlot`]s that partition the logical row space `[1, logical_row_count]` exactly.
//! Which database slot receives a fragment is a pluggable [`SlotPolicy`].

mod key_range;
mod planner;
mod slot_policy;

pub use key_range::{FragmentSlot, FragmentSlots, FragmentSlotsIterator, ParFragmentSlotsIterator};
pub use planner::{PartitionHints, PartitionRequest, Plan, ResourceConstraintError};
pub use slot_policy::{PackedSlotPolicy, RoundRobinSlotPolicy, SlotPolicy, SlotPolicyTraits};
