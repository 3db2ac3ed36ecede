//! Traffic mix allocation
//!
//! - `catalog`: concrete device identities per device type and engine
//! - `allocator`: turns a `DistributionSpec` and a target into exact counts

pub mod allocator;
pub mod catalog;

pub use allocator::{DistributionAllocator, reconcile, split_weighted};
pub use catalog::{DeviceCatalog, DeviceIdentity};

use crate::models::{DistributionAssignment, DistributionMatrixEntry};

/// Expand a matrix into one assignment per unit, in matrix order
pub fn flatten(entries: &[DistributionMatrixEntry]) -> Vec<DistributionAssignment> {
    let mut slots = Vec::with_capacity(entries.iter().map(|e| e.count as usize).sum());
    for entry in entries {
        let assignment = entry.assignment();
        slots.extend(std::iter::repeat_n(assignment, entry.count as usize));
    }
    slots
}
