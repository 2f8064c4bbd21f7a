//! The collector context.
//!
//! A [`Heap`] owns every piece of collector state: the allocation registry,
//! the table of live handles, the allocated-byte counter and the epoch
//! flag. Handles keep a shared link to the heap's interior so they can
//! deregister themselves when dropped, but they never own allocations;
//! memory is only freed by [`Heap::release`], [`Heap::collect`] or by
//! dropping the heap.

use std::alloc::{alloc, handle_alloc_error, Layout};
use std::any::type_name;
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashSet;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::panic::Location;
use std::ptr::NonNull;
use std::rc::Rc;
use std::time::Instant;

use crate::config::HeapConfig;
use crate::handles::{Gc, HandleEntry, HandleKey, HandleTable, Root};
use crate::info::AllocationInfo;
use crate::metrics::{CollectStats, GcHistory, HeapMetrics, PhaseTimer};
use crate::registry::{drop_glue, AllocationRecord, DropFn, RecordKey, Registry, Unlinked};
use crate::{mark, sweep, tracing};

// ============================================================================
// Epoch
// ============================================================================

/// The alternating flag that tells this collection's marks apart from the
/// previous one's.
///
/// An allocation is live in the current epoch iff its mark equals the
/// heap's epoch. New allocations start out marked with the epoch current at
/// the time they were made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Epoch(bool);

impl Epoch {
    pub(crate) const INITIAL: Self = Self(true);

    const fn flipped(self) -> Self {
        Self(!self.0)
    }

    /// The raw flag value.
    #[must_use]
    pub const fn as_bool(self) -> bool {
        self.0
    }
}

// ============================================================================
// HeapState - everything behind the RefCell
// ============================================================================

pub(crate) struct HeapState {
    pub(crate) registry: Registry,
    pub(crate) handles: HandleTable,
    pub(crate) epoch: Epoch,
    pub(crate) collections: u64,
    pub(crate) metrics: HeapMetrics,
    pub(crate) history: GcHistory,
}

impl HeapState {
    /// Add a handle to the table, bound to `record` if it is still live.
    pub(crate) fn register_handle(&mut self, is_root: bool, record: Option<RecordKey>) -> HandleKey {
        let record = record.filter(|&r| self.registry.contains(r));
        let key = self.handles.insert(HandleEntry { record, is_root });
        if let Some(target) = record.and_then(|r| self.registry.get_mut(r)) {
            target.bound.insert(key);
        }
        key
    }

    /// Move a handle's binding, keeping both records' back-references exact.
    pub(crate) fn rebind(&mut self, key: HandleKey, target: Option<RecordKey>) {
        let target = target.filter(|&r| self.registry.contains(r));
        let Some(entry) = self.handles.get_mut(key) else {
            return;
        };
        let previous = mem::replace(&mut entry.record, target);
        if previous == target {
            return;
        }

        if let Some(old) = previous.and_then(|r| self.registry.get_mut(r)) {
            old.bound.remove(&key);
        }
        if let Some(new) = target.and_then(|r| self.registry.get_mut(r)) {
            new.bound.insert(key);
        }
    }

    pub(crate) fn unregister_handle(&mut self, key: HandleKey) {
        if let Some(HandleEntry {
            record: Some(record),
            ..
        }) = self.handles.remove(key)
        {
            if let Some(target) = self.registry.get_mut(record) {
                target.bound.remove(&key);
            }
        }
    }

    pub(crate) fn handle_record(&self, key: HandleKey) -> Option<RecordKey> {
        self.handles.get(key).and_then(|entry| entry.record)
    }

    pub(crate) fn handle_target(&self, key: HandleKey) -> Option<NonNull<u8>> {
        self.handle_record(key)
            .and_then(|record| self.registry.get(record))
            .map(|record| record.address)
    }

    /// Resolve a raw address for binding. The first typed binding of a
    /// record that has no destructor yet supplies one.
    pub(crate) fn resolve_for_binding(&mut self, address: usize, destroy: DropFn) -> Option<RecordKey> {
        let key = self.registry.lookup(address)?;
        if let Some(record) = self.registry.get_mut(key) {
            record.destroy.get_or_insert(destroy);
        }
        Some(key)
    }

    /// Take a record out of the registry and unbind every handle that
    /// referenced it. Returns the pending reclamation and the number of
    /// handles invalidated.
    pub(crate) fn unlink(&mut self, key: RecordKey) -> Option<(Unlinked, usize)> {
        let record = self.registry.remove(key)?;
        for &handle in &record.bound {
            self.handles.invalidate(handle);
        }
        let invalidated = record.bound.len();
        Some((Unlinked::from(record), invalidated))
    }
}

// ============================================================================
// HeapInner - shared between the Heap and its handles
// ============================================================================

pub(crate) struct HeapInner {
    state: RefCell<HeapState>,
}

impl HeapInner {
    pub(crate) fn state(&self) -> RefMut<'_, HeapState> {
        self.state.borrow_mut()
    }

    pub(crate) fn view(&self) -> Ref<'_, HeapState> {
        self.state.borrow()
    }
}

/// Counted link from a handle to its heap's interior.
///
/// Holds the pointer returned by `Rc::into_raw`, so the word stored in a
/// handle equals `Rc::as_ptr` of the heap's interior. It is the only niche
/// in a handle: `None::<Gc<T>>` zeroes exactly this word.
#[repr(transparent)]
pub(crate) struct HeapLink(NonNull<HeapInner>);

impl HeapLink {
    pub(crate) fn new(inner: &Rc<HeapInner>) -> Self {
        let raw = Rc::into_raw(Rc::clone(inner));
        // SAFETY: `Rc::into_raw` never returns null.
        Self(unsafe { NonNull::new_unchecked(raw.cast_mut()) })
    }

    /// Address of the heap interior, as found in handle memory.
    #[cfg(test)]
    pub(crate) fn addr(&self) -> usize {
        self.0.as_ptr() as usize
    }

    pub(crate) fn same_heap(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Deref for HeapLink {
    type Target = HeapInner;

    fn deref(&self) -> &HeapInner {
        // SAFETY: the link owns a strong count, so the interior is alive.
        unsafe { self.0.as_ref() }
    }
}

impl Clone for HeapLink {
    fn clone(&self) -> Self {
        // SAFETY: the pointer came from `Rc::into_raw` and is still counted.
        unsafe { Rc::increment_strong_count(self.0.as_ptr()) };
        Self(self.0)
    }
}

impl Drop for HeapLink {
    fn drop(&mut self) {
        // SAFETY: gives back the strong count taken in `new` or `clone`.
        drop(unsafe { Rc::from_raw(self.0.as_ptr()) });
    }
}

// ============================================================================
// Heap
// ============================================================================

/// A garbage-collected heap.
///
/// Objects are allocated with [`Heap::allocate`] (or [`Heap::new_root`] /
/// [`Heap::new_gc`], which also bind a handle) and referenced through
/// [`Root`] and [`Gc`] handles. [`Heap::collect`] reclaims every object
/// that is not reachable from a root handle, where "reachable" means: bound
/// to a root, or bound to a `Gc` handle stored inline inside a reachable
/// object.
///
/// The heap is single-threaded (`!Send`, `!Sync`). Dropping it destroys
/// every object that is still allocated and invalidates every handle that
/// outlives it.
pub struct Heap {
    inner: Rc<HeapInner>,
}

impl Heap {
    /// Create a heap with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    /// Create a heap with the given configuration.
    #[must_use]
    pub fn with_config(config: HeapConfig) -> Self {
        let state = HeapState {
            registry: Registry::with_capacity(config.record_capacity),
            handles: HandleTable::with_capacity(config.handle_capacity),
            epoch: Epoch::INITIAL,
            collections: 0,
            metrics: HeapMetrics::new(),
            history: GcHistory::new(config.history_len),
        };
        Self {
            inner: Rc::new(HeapInner {
                state: RefCell::new(state),
            }),
        }
    }

    pub(crate) const fn inner(&self) -> &Rc<HeapInner> {
        &self.inner
    }

    // ------------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------------

    /// Move `value` into a new managed allocation and return its address.
    ///
    /// The destructor for `T` is recorded immediately, so the value is
    /// dropped when the allocation is released or collected whether or not
    /// a handle was ever bound to it. The returned pointer should be wrapped
    /// in a handle straight away; a bare pointer does not keep the object
    /// alive.
    #[track_caller]
    pub fn allocate<T: 'static>(&self, value: T) -> NonNull<T> {
        let layout = Layout::new::<T>();
        let (address, backing) = reserve(layout);
        // SAFETY: fresh allocation, sized and aligned for `T`.
        unsafe { address.cast::<T>().as_ptr().write(value) };

        self.register(
            address,
            layout.size(),
            backing,
            Some(type_name::<T>()),
            Some(drop_glue::<T>),
            Location::caller(),
        );
        address.cast()
    }

    /// Reserve uninitialized memory for `layout` and register it.
    ///
    /// No destructor is known for a raw allocation until a typed handle is
    /// first bound to it (see [`Handle::from_raw`](crate::Handle::from_raw)).
    /// A raw allocation reclaimed before that is freed without running any
    /// destructor, and counted in [`CollectStats::destructors_skipped`].
    ///
    /// Zero-sized layouts still get a distinct address but account for zero
    /// bytes.
    #[track_caller]
    pub fn allocate_raw(&self, layout: Layout) -> NonNull<u8> {
        let (address, backing) = reserve(layout);
        self.register(address, layout.size(), backing, None, None, Location::caller());
        address
    }

    fn register(
        &self,
        address: NonNull<u8>,
        size: usize,
        backing: Layout,
        type_name: Option<&'static str>,
        destroy: Option<DropFn>,
        location: &'static Location<'static>,
    ) {
        let mut state = self.inner.state();
        let mark = state.epoch;
        state.registry.insert(AllocationRecord {
            address,
            size,
            backing,
            mark,
            location,
            type_name,
            bound: HashSet::new(),
            destroy,
        });
        let allocated = state.registry.allocated_bytes();
        state.metrics.note_allocated(allocated);
        drop(state);

        tracing::log_allocate(size, location);
    }

    /// Release an allocation immediately.
    ///
    /// Every handle bound to it becomes unbound, its destructor (if known)
    /// runs and its memory is freed. Returns `false`, with no other effect,
    /// if `ptr` is not the address of a live allocation; releasing twice is
    /// harmless.
    pub fn release<T: ?Sized>(&self, ptr: *const T) -> bool {
        let address = ptr.cast::<u8>() as usize;
        let mut state = self.inner.state();
        let Some((unlinked, _)) = state.registry.lookup(address).and_then(|key| state.unlink(key)) else {
            return false;
        };
        state.metrics.explicit_releases += 1;
        drop(state);

        tracing::log_release(unlinked.size, unlinked.location);
        let skipped = sweep::reclaim(vec![unlinked]);
        if skipped > 0 {
            self.inner.state().metrics.destructors_skipped += skipped;
        }
        true
    }

    // ------------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------------

    /// Allocate `value` and bind a new root handle to it.
    #[track_caller]
    pub fn new_root<T: 'static>(&self, value: T) -> Root<T> {
        let ptr = self.allocate(value);
        // SAFETY: `ptr` was just allocated by this heap and holds a `T`.
        unsafe { Root::from_raw(self, ptr.as_ptr()) }
    }

    /// Allocate `value` and bind a new ordinary handle to it.
    ///
    /// Unless the handle is stored inside a reachable object (or copied
    /// into a root), the allocation is reclaimed by the next collection.
    #[track_caller]
    pub fn new_gc<T: 'static>(&self, value: T) -> Gc<T> {
        let ptr = self.allocate(value);
        // SAFETY: `ptr` was just allocated by this heap and holds a `T`.
        unsafe { Gc::from_raw(self, ptr.as_ptr()) }
    }

    /// An unbound root handle.
    #[must_use]
    pub fn null_root<T: 'static>(&self) -> Root<T> {
        Root::null(self)
    }

    /// An unbound ordinary handle.
    #[must_use]
    pub fn null_gc<T: 'static>(&self) -> Gc<T> {
        Gc::null(self)
    }

    // ------------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------------

    /// Run a full mark-sweep collection.
    ///
    /// Flips the epoch, marks everything reachable from root handles and
    /// reclaims the rest. Every handle bound to a reclaimed object is unbound
    /// before any destructor runs. Destructors run in address order, after
    /// the heap's bookkeeping is consistent again, so they may freely drop
    /// the handles they contain.
    pub fn collect(&self) -> CollectStats {
        let started = Instant::now();
        let mut timer = PhaseTimer::new();
        let owner = Rc::as_ptr(&self.inner) as usize;

        let mut state = self.inner.state();
        state.epoch = state.epoch.flipped();
        state.collections += 1;
        let mut stats = CollectStats::new(state.collections, state.epoch);

        #[cfg(feature = "tracing")]
        let _span = tracing::internal::trace_collection(stats.sequence);

        timer.start();
        mark::mark_from_roots(&mut state, owner, &mut stats);
        timer.end_mark();

        timer.start();
        let condemned = sweep::condemn(&mut state, &mut stats);
        drop(state);
        stats.destructors_skipped = sweep::reclaim(condemned);
        timer.end_sweep();

        let mut state = self.inner.state();
        stats.objects_surviving = state.registry.len();
        stats.bytes_surviving = state.registry.allocated_bytes();
        stats.mark_duration = timer.mark;
        stats.sweep_duration = timer.sweep;
        stats.duration = started.elapsed();

        state.metrics.record(&stats);
        state.history.push(stats);
        stats
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    /// Sum of the sizes of every live allocation.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.inner.view().registry.allocated_bytes()
    }

    /// Number of live allocations.
    #[must_use]
    pub fn allocation_count(&self) -> usize {
        self.inner.view().registry.len()
    }

    /// Number of live handles of either kind.
    #[must_use]
    pub fn handle_count(&self) -> usize {
        self.inner.view().handles.len()
    }

    /// Number of live root handles.
    #[must_use]
    pub fn root_count(&self) -> usize {
        self.inner.view().handles.root_count()
    }

    /// The current epoch.
    #[must_use]
    pub fn epoch(&self) -> Epoch {
        self.inner.view().epoch
    }

    /// Whether `ptr` is the address of a live allocation.
    #[must_use]
    pub fn is_registered<T: ?Sized>(&self, ptr: *const T) -> bool {
        self.inner.view().registry.lookup(ptr.cast::<u8>() as usize).is_some()
    }

    /// Snapshot of every live allocation, in address order.
    #[must_use]
    pub fn allocations(&self) -> Vec<AllocationInfo> {
        let state = self.inner.view();
        let epoch = state.epoch;
        state
            .registry
            .iter()
            .map(|(_, record)| AllocationInfo::from_record(record, epoch))
            .collect()
    }

    /// Statistics of the most recent collection.
    #[must_use]
    pub fn last_collection(&self) -> Option<CollectStats> {
        self.inner.view().history.latest()
    }

    /// Recent collections, oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<CollectStats> {
        self.inner.view().history.iter().copied().collect()
    }

    /// Cumulative statistics since the heap was created.
    #[must_use]
    pub fn metrics(&self) -> HeapMetrics {
        self.inner.view().metrics
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.view();
        f.debug_struct("Heap")
            .field("allocations", &state.registry.len())
            .field("allocated_bytes", &state.registry.allocated_bytes())
            .field("handles", &state.handles.len())
            .field("roots", &state.handles.root_count())
            .field("epoch", &state.epoch)
            .finish()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        // Destructors may allocate; keep going until nothing is left.
        loop {
            let mut state = self.inner.state();
            let keys: Vec<RecordKey> = state.registry.keys().collect();
            if keys.is_empty() {
                break;
            }
            let doomed: Vec<Unlinked> = keys
                .into_iter()
                .filter_map(|key| state.unlink(key).map(|(unlinked, _)| unlinked))
                .collect();
            drop(state);
            sweep::reclaim(doomed);
        }
    }
}

// ============================================================================
// Backing memory
// ============================================================================

/// Backing layout for a request: at least one byte, and aligned for a
/// handle key so handles can be embedded at their natural offsets.
fn backing_layout(layout: Layout) -> Layout {
    Layout::from_size_align(
        layout.size().max(1),
        layout.align().max(mem::align_of::<HandleKey>()),
    )
    .unwrap_or_else(|_| handle_alloc_error(layout))
}

fn reserve(layout: Layout) -> (NonNull<u8>, Layout) {
    let backing = backing_layout(layout);
    // SAFETY: `backing` has a non-zero size.
    let ptr = unsafe { alloc(backing) };
    let ptr = NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(backing));
    (ptr, backing)
}
