//! Allocation snapshots and heap teardown.

use handle_gc::{Heap, Root};
use std::cell::Cell;
use std::rc::Rc;

struct Payload(u32);

struct Counted(Rc<Cell<usize>>);

impl Drop for Counted {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

#[test]
fn test_snapshot_describes_allocation() {
    let heap = Heap::new();
    let (root, line) = (heap.new_root(Payload(3)), line!());
    let _copy = root.clone();

    let infos = heap.allocations();
    assert_eq!(infos.len(), 1);
    let info = &infos[0];

    assert_eq!(info.size, std::mem::size_of::<Payload>());
    assert_eq!(Some(info.address), root.get().map(|p| p.as_ptr() as usize));
    assert!(info.type_name.is_some_and(|name| name.ends_with("Payload")));
    assert!(info.location.file().ends_with("diagnostics.rs"));
    assert_eq!(info.location.line(), line);
    assert_eq!(info.bound_handles, 2);
    assert!(info.has_destructor);
    assert!(info.marked);
}

#[test]
fn test_snapshot_is_address_ordered() {
    let heap = Heap::new();
    let _roots: Vec<Root<u64>> = (0..16).map(|i| heap.new_root(i)).collect();

    let addresses: Vec<usize> = heap.allocations().iter().map(|a| a.address).collect();
    let mut sorted = addresses.clone();
    sorted.sort_unstable();
    assert_eq!(addresses, sorted);
}

#[test]
fn test_display_names_type_and_site() {
    let heap = Heap::new();
    let _root = heap.new_root(Payload(1));
    let _raw = heap.allocate_raw(std::alloc::Layout::new::<[u8; 4]>());

    let lines: Vec<String> = heap.allocations().iter().map(ToString::to_string).collect();
    assert!(lines.iter().any(|l| l.contains("Payload") && l.contains("diagnostics.rs:")));
    assert!(lines.iter().any(|l| l.starts_with("<raw> (4 bytes)")));
}

#[test]
fn test_dropping_heap_destroys_remaining_objects() {
    let drops = Rc::new(Cell::new(0));
    let survivor: Root<Counted>;
    {
        let heap = Heap::new();
        survivor = heap.new_root(Counted(Rc::clone(&drops)));
        heap.allocate(Counted(Rc::clone(&drops)));
        assert_eq!(drops.get(), 0);
    }

    assert_eq!(drops.get(), 2);
    assert!(!survivor.is_valid());
}

#[test]
fn test_dropping_heap_reclaims_objects_allocated_by_destructors() {
    struct Reallocate {
        heap: *const Heap,
        drops: Rc<Cell<usize>>,
    }

    impl Drop for Reallocate {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
            // SAFETY: the heap is being torn down but its storage is intact
            // until its own drop returns.
            let heap = unsafe { &*self.heap };
            heap.allocate(Counted(Rc::clone(&self.drops)));
        }
    }

    let drops = Rc::new(Cell::new(0));
    {
        let heap = Heap::new();
        heap.allocate(Reallocate {
            heap: &raw const heap,
            drops: Rc::clone(&drops),
        });
        assert_eq!(heap.allocation_count(), 1);
    }

    // The `Reallocate` itself, then the `Counted` it allocated while dying.
    assert_eq!(drops.get(), 2);
}
