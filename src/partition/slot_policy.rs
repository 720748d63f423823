//! Database slot assignment policies.
//!
//! A [`SlotPolicy`] is a [`Box`] wrapped policy which implements [`SlotPolicyTraits`].
//! It decides which database slot (host/db pair) receives fragment `i` of a plan.
//! Two policies exist: [`PackedSlotPolicy`] fills each slot before moving to the next,
//! [`RoundRobinSlotPolicy`] cycles over the host pool.

use derive_more::{Deref, From};

use super::Plan;

/// A database slot assignment policy.
#[derive(Debug, Clone, Deref, From)]
pub struct SlotPolicy(Box<dyn SlotPolicyTraits>);

impl SlotPolicy {
    /// Create a slot policy.
    pub fn new<T: SlotPolicyTraits + 'static>(policy: T) -> Self {
        let policy: Box<dyn SlotPolicyTraits> = Box::new(policy);
        policy.into()
    }
}

impl Default for SlotPolicy {
    /// The packed policy, matching the allocator's `(i - 1) / fragments_per_db` contract.
    fn default() -> Self {
        Self::new(PackedSlotPolicy)
    }
}

/// Slot policy traits.
pub trait SlotPolicyTraits: dyn_clone::DynClone + core::fmt::Debug + Send + Sync {
    /// The unique name of the policy.
    fn name(&self) -> &'static str;

    /// The database slot receiving the fragment with 1-based `relative_index`.
    ///
    /// The returned slot is in `[0, plan.host_number)`.
    fn db_slot(&self, relative_index: u64, plan: &Plan) -> u64;
}

dyn_clone::clone_trait_object!(SlotPolicyTraits);

/// Packed slot assignment: consecutive fragments fill a slot before moving to the next.
#[derive(Copy, Clone, Debug, Default)]
pub struct PackedSlotPolicy;

impl SlotPolicyTraits for PackedSlotPolicy {
    fn name(&self) -> &'static str {
        "packed"
    }

    fn db_slot(&self, relative_index: u64, plan: &Plan) -> u64 {
        debug_assert!(relative_index >= 1);
        (relative_index - 1) / plan.fragments_per_db
    }
}

/// Round-robin slot assignment: consecutive fragments cycle over the host pool.
#[derive(Copy, Clone, Debug, Default)]
pub struct RoundRobinSlotPolicy;

impl SlotPolicyTraits for RoundRobinSlotPolicy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn db_slot(&self, relative_index: u64, plan: &Plan) -> u64 {
        debug_assert!(relative_index >= 1);
        (relative_index - 1) % plan.host_number
    }
}
