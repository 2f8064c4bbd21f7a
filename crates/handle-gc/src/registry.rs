//! Allocation registry.
//!
//! Maps every managed object's address to its allocation record. Records
//! live in a slab addressed by [`RecordKey`]; a separate ordered index maps
//! addresses to keys so lookups by raw address and the sweep's address-order
//! walk are both cheap.

use std::alloc::{dealloc, Layout};
use std::collections::{BTreeMap, HashSet};
use std::panic::Location;
use std::ptr::NonNull;

use crate::handles::HandleKey;
use crate::heap::Epoch;

/// Type-erased destructor for the value stored at an address.
pub type DropFn = unsafe fn(NonNull<u8>);

/// Drop glue for `T`, erased to a [`DropFn`].
///
/// # Safety
///
/// `ptr` must point to an initialized `T` that is not used afterwards.
pub unsafe fn drop_glue<T>(ptr: NonNull<u8>) {
    // SAFETY: caller guarantees `ptr` holds an initialized `T`.
    unsafe { ptr.cast::<T>().as_ptr().drop_in_place() };
}

// ============================================================================
// AllocationRecord
// ============================================================================

/// Slab key of an allocation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    index: u32,
    generation: u32,
}

/// Metadata for one live managed object.
pub struct AllocationRecord {
    pub address: NonNull<u8>,
    /// Requested size; the accounting unit and the mark engine's scan window.
    pub size: usize,
    /// Layout of the backing memory actually reserved.
    pub backing: Layout,
    pub mark: Epoch,
    pub location: &'static Location<'static>,
    /// Set for typed allocations only.
    pub type_name: Option<&'static str>,
    /// Back-references to every live handle bound here. Never owning.
    pub bound: HashSet<HandleKey>,
    pub destroy: Option<DropFn>,
}

struct RecordSlot {
    generation: u32,
    record: Option<AllocationRecord>,
}

// ============================================================================
// Registry
// ============================================================================

pub struct Registry {
    slots: Vec<RecordSlot>,
    free: Vec<u32>,
    by_address: BTreeMap<usize, RecordKey>,
    allocated_bytes: usize,
}

impl Registry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            by_address: BTreeMap::new(),
            allocated_bytes: 0,
        }
    }

    /// Insert a record and account for its size.
    ///
    /// # Panics
    ///
    /// Panics if more than `u32::MAX` records are alive at once.
    pub fn insert(&mut self, record: AllocationRecord) -> RecordKey {
        let address = record.address.as_ptr() as usize;
        self.allocated_bytes += record.size;

        let key = if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.record = Some(record);
            RecordKey {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).expect("allocation registry exhausted");
            self.slots.push(RecordSlot {
                generation: 0,
                record: Some(record),
            });
            RecordKey {
                index,
                generation: 0,
            }
        };

        self.by_address.insert(address, key);
        key
    }

    /// Remove a record and release its share of the byte counter.
    ///
    /// The backing memory is untouched; the caller decides when to
    /// destroy and free it.
    pub fn remove(&mut self, key: RecordKey) -> Option<AllocationRecord> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation != key.generation {
            return None;
        }
        let record = slot.record.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);

        self.by_address.remove(&(record.address.as_ptr() as usize));
        self.allocated_bytes -= record.size;
        Some(record)
    }

    pub fn get(&self, key: RecordKey) -> Option<&AllocationRecord> {
        let slot = self.slots.get(key.index as usize)?;
        if slot.generation == key.generation {
            slot.record.as_ref()
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, key: RecordKey) -> Option<&mut AllocationRecord> {
        let slot = self.slots.get_mut(key.index as usize)?;
        if slot.generation == key.generation {
            slot.record.as_mut()
        } else {
            None
        }
    }

    pub fn contains(&self, key: RecordKey) -> bool {
        self.get(key).is_some()
    }

    /// Find the record whose object starts at `address`.
    pub fn lookup(&self, address: usize) -> Option<RecordKey> {
        self.by_address.get(&address).copied()
    }

    /// Records in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (RecordKey, &AllocationRecord)> + '_ {
        self.by_address
            .values()
            .filter_map(|&key| self.get(key).map(|record| (key, record)))
    }

    pub fn keys(&self) -> impl Iterator<Item = RecordKey> + '_ {
        self.by_address.values().copied()
    }

    pub fn len(&self) -> usize {
        self.by_address.len()
    }

    pub const fn allocated_bytes(&self) -> usize {
        self.allocated_bytes
    }
}

// ============================================================================
// Unlinked - removed from the registry, memory not yet reclaimed
// ============================================================================

/// An allocation that has left the registry and whose memory is still
/// waiting to be destroyed and freed.
pub struct Unlinked {
    pub address: NonNull<u8>,
    pub size: usize,
    pub backing: Layout,
    pub location: &'static Location<'static>,
    pub destroy: Option<DropFn>,
}

impl From<AllocationRecord> for Unlinked {
    fn from(record: AllocationRecord) -> Self {
        Self {
            address: record.address,
            size: record.size,
            backing: record.backing,
            location: record.location,
            destroy: record.destroy,
        }
    }
}

impl Unlinked {
    /// Run the destructor (if one was captured) and free the memory.
    ///
    /// Returns `false` when no destructor was available.
    ///
    /// # Safety
    ///
    /// The memory must have come from the registry's allocator with
    /// `self.backing`, and must not be reachable through any handle.
    pub unsafe fn reclaim(self) -> bool {
        let destroyed = if let Some(destroy) = self.destroy {
            // SAFETY: destroy was captured for the type stored here.
            unsafe { destroy(self.address) };
            true
        } else {
            false
        };

        // SAFETY: allocated with this layout by `heap::reserve`.
        unsafe { dealloc(self.address.as_ptr(), self.backing) };
        destroyed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: usize, size: usize) -> AllocationRecord {
        AllocationRecord {
            address: NonNull::new(address as *mut u8).unwrap(),
            size,
            backing: Layout::from_size_align(size.max(1), 8).unwrap(),
            mark: Epoch::INITIAL,
            location: Location::caller(),
            type_name: None,
            bound: HashSet::new(),
            destroy: None,
        }
    }

    #[test]
    fn test_byte_counter_follows_insert_and_remove() {
        let mut registry = Registry::with_capacity(0);
        let a = registry.insert(record(0x1000, 16));
        let _b = registry.insert(record(0x2000, 48));
        assert_eq!(registry.allocated_bytes(), 64);

        registry.remove(a);
        assert_eq!(registry.allocated_bytes(), 48);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_by_address() {
        let mut registry = Registry::with_capacity(0);
        let key = registry.insert(record(0x3000, 8));
        assert_eq!(registry.lookup(0x3000), Some(key));
        assert_eq!(registry.lookup(0x3008), None);

        registry.remove(key);
        assert_eq!(registry.lookup(0x3000), None);
    }

    #[test]
    fn test_stale_key_after_reuse() {
        let mut registry = Registry::with_capacity(0);
        let old = registry.insert(record(0x1000, 8));
        registry.remove(old);
        let new = registry.insert(record(0x2000, 8));

        assert!(!registry.contains(old));
        assert!(registry.contains(new));
        assert!(registry.remove(old).is_none());
    }

    #[test]
    fn test_iteration_is_address_ordered() {
        let mut registry = Registry::with_capacity(0);
        registry.insert(record(0x3000, 8));
        registry.insert(record(0x1000, 8));
        registry.insert(record(0x2000, 8));

        let addresses: Vec<usize> = registry
            .iter()
            .map(|(_, r)| r.address.as_ptr() as usize)
            .collect();
        assert_eq!(addresses, vec![0x1000, 0x2000, 0x3000]);
    }
}
