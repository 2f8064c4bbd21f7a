//! Allocation snapshots for diagnostics.

use std::fmt;
use std::panic::Location;

use crate::heap::Epoch;
use crate::registry::AllocationRecord;

/// A snapshot of one live allocation, as returned by
/// [`Heap::allocations`](crate::Heap::allocations).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationInfo {
    /// Address of the object.
    pub address: usize,
    /// Requested size in bytes.
    pub size: usize,
    /// Where the object was allocated.
    pub location: &'static Location<'static>,
    /// Type of the stored value; `None` for raw allocations.
    pub type_name: Option<&'static str>,
    /// Handles currently bound to the object.
    pub bound_handles: usize,
    /// Whether a destructor will run when the object is reclaimed.
    pub has_destructor: bool,
    /// Whether the object carries the heap's current epoch.
    pub marked: bool,
}

impl AllocationInfo {
    pub(crate) fn from_record(record: &AllocationRecord, epoch: Epoch) -> Self {
        Self {
            address: record.address.as_ptr() as usize,
            size: record.size,
            location: record.location,
            type_name: record.type_name,
            bound_handles: record.bound.len(),
            has_destructor: record.destroy.is_some(),
            marked: record.mark == epoch,
        }
    }
}

impl fmt::Display for AllocationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes) at {}:{}",
            self.type_name.unwrap_or("<raw>"),
            self.size,
            self.location.file(),
            self.location.line()
        )
    }
}
