//! Handles: the references through which client code touches managed objects.
//!
//! A [`Handle`] is bound to at most one allocation. It comes in two kinds
//! that share every operation and differ only in whether the collector
//! treats them as roots:
//!
//! - [`Root<T>`] is held outside the managed heap (a local, a global, a
//!   field of an unmanaged struct) and keeps its target alive by itself.
//! - [`Gc<T>`] is meant to be stored inline in another managed object. It
//!   keeps its target alive only while the object containing it is
//!   reachable.
//!
//! Handles never own their target. When the target is released or
//! collected, every handle bound to it becomes unbound and
//! [`Handle::get`] returns `None`.
//!
//! # Example
//!
//! ```
//! use handle_gc::{Gc, Heap};
//!
//! struct Node {
//!     next: Gc<Node>,
//! }
//!
//! let heap = Heap::new();
//! let a = heap.new_root(Node { next: heap.null_gc() });
//! let b = heap.new_gc(Node { next: heap.null_gc() });
//!
//! // SAFETY: `a` is bound and no collection runs while the borrow lives.
//! unsafe { a.as_ref() }.unwrap().next.set(&b);
//! drop(b);
//!
//! heap.collect();
//! assert_eq!(heap.allocation_count(), 2);
//! ```

mod table;

pub(crate) use table::{HandleEntry, HandleKey, HandleTable};

use std::fmt;
use std::marker::PhantomData;
use std::panic::Location;
use std::ptr::NonNull;

use crate::heap::{Heap, HeapLink};
use crate::registry::{drop_glue, RecordKey};

// ============================================================================
// Handle kinds
// ============================================================================

mod sealed {
    pub trait Sealed {}

    impl Sealed for super::Member {}
    impl Sealed for super::Rooted {}
}

/// Marker for the two handle kinds. Sealed.
pub trait HandleKind: sealed::Sealed + 'static {
    /// Whether handles of this kind anchor the mark phase.
    const IS_ROOT: bool;
    /// Name used in `Debug` output.
    const NAME: &'static str;
}

/// Kind of ordinary, embeddable handles.
#[derive(Debug)]
pub enum Member {}

/// Kind of root handles.
#[derive(Debug)]
pub enum Rooted {}

impl HandleKind for Member {
    const IS_ROOT: bool = false;
    const NAME: &'static str = "Gc";
}

impl HandleKind for Rooted {
    const IS_ROOT: bool = true;
    const NAME: &'static str = "Root";
}

/// An ordinary handle.
pub type Gc<T> = Handle<T, Member>;

/// A root handle.
pub type Root<T> = Handle<T, Rooted>;

// ============================================================================
// Handle
// ============================================================================

/// A tracked reference to a managed `T`.
///
/// The first word of every handle is its slot key and the second is the
/// address of its heap. The collector discovers which objects contain which
/// handles by scanning object memory for a live key followed by its own
/// heap's address, so a `Gc<T>` must be stored inline in its owner (a
/// field, an array element) to count as an edge. A handle kept in a
/// separately allocated buffer such as a `Vec` is invisible to the scan.
///
/// Moving a handle out through `Option::take`, `mem::replace` or plain
/// assignment overwrites the heap word, so the old slot stops counting. Raw
/// copies that leave the source bytes intact (`ptr::read`,
/// `MaybeUninit::assume_init_read`) do not: until those bytes are
/// overwritten or the moved handle is dropped, the object still counts as
/// containing it.
///
/// All mutation goes through `&self`, so a handle inside a shared object
/// can be rebound without exclusive access.
#[repr(C)]
pub struct Handle<T, K> {
    key: HandleKey,
    heap: HeapLink,
    _marker: PhantomData<(*const T, K)>,
}

impl<T: 'static, K: HandleKind> Handle<T, K> {
    fn register(heap: HeapLink, record: Option<RecordKey>) -> Self {
        let key = heap.state().register_handle(K::IS_ROOT, record);
        Self {
            key,
            heap,
            _marker: PhantomData,
        }
    }

    /// An unbound handle.
    #[must_use]
    pub fn null(heap: &Heap) -> Self {
        Self::register(HeapLink::new(heap.inner()), None)
    }

    /// Bind a handle to the allocation at `ptr`.
    ///
    /// If `ptr` is not the address of a live allocation of `heap` the
    /// handle starts out unbound. If the allocation has no destructor yet
    /// (it came from [`Heap::allocate_raw`]), the destructor for `T` is
    /// captured now.
    ///
    /// # Safety
    ///
    /// If `ptr` is a live raw allocation without a destructor, it must hold
    /// an initialized `T` by the time it is released or collected.
    pub unsafe fn from_raw(heap: &Heap, ptr: *const T) -> Self {
        let record = heap
            .inner()
            .state()
            .resolve_for_binding(ptr as usize, drop_glue::<T>);
        Self::register(HeapLink::new(heap.inner()), record)
    }

    /// A new handle of kind `K` bound to the same allocation as `other`.
    ///
    /// `Root::from_handle(&gc)` roots whatever an ordinary handle points at;
    /// `Gc::from_handle(&root)` does the reverse.
    #[must_use]
    pub fn from_handle<K2: HandleKind>(other: &Handle<T, K2>) -> Self {
        let record = other.heap.view().handle_record(other.key);
        Self::register(other.heap.clone(), record)
    }

    /// Address of the bound object, or `None` when unbound.
    #[must_use]
    pub fn get(&self) -> Option<NonNull<T>> {
        self.heap.view().handle_target(self.key).map(NonNull::cast)
    }

    /// Whether the handle is bound.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.heap.view().handle_record(self.key).is_some()
    }

    /// Whether this is a root handle.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        K::IS_ROOT
    }

    /// Rebind to whatever `other` is bound to (or unbind, if it is unbound).
    ///
    /// # Panics
    ///
    /// Panics if the two handles belong to different heaps.
    pub fn set<K2: HandleKind>(&self, other: &Handle<T, K2>) {
        assert!(
            self.heap.same_heap(&other.heap),
            "cannot assign a handle from a different heap"
        );
        let mut state = self.heap.state();
        let target = state.handle_record(other.key);
        state.rebind(self.key, target);
    }

    /// Rebind to the allocation at `ptr`. A null or unregistered `ptr`
    /// leaves the handle unbound.
    ///
    /// # Safety
    ///
    /// Same contract as [`Handle::from_raw`].
    pub unsafe fn set_raw(&self, ptr: *const T) {
        let mut state = self.heap.state();
        let target = state.resolve_for_binding(ptr as usize, drop_glue::<T>);
        state.rebind(self.key, target);
    }

    /// Unbind the handle.
    pub fn clear(&self) {
        self.heap.state().rebind(self.key, None);
    }

    /// Borrow the bound object.
    ///
    /// # Safety
    ///
    /// The object must not be released or collected while the returned
    /// reference is alive, and no `&mut T` to it may exist.
    #[must_use]
    pub unsafe fn as_ref(&self) -> Option<&T> {
        // SAFETY: the caller keeps the object alive and unaliased.
        self.get().map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Whether both handles are bound to the same allocation.
    #[must_use]
    pub fn ptr_eq<K2: HandleKind>(&self, other: &Handle<T, K2>) -> bool {
        if !self.heap.same_heap(&other.heap) {
            return false;
        }
        let state = self.heap.view();
        match (state.handle_record(self.key), state.handle_record(other.key)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Where the bound object was allocated.
    #[must_use]
    pub fn source_location(&self) -> Option<&'static Location<'static>> {
        let state = self.heap.view();
        state
            .handle_record(self.key)
            .and_then(|record| state.registry.get(record))
            .map(|record| record.location)
    }
}

impl<T: 'static, K: HandleKind> Clone for Handle<T, K> {
    fn clone(&self) -> Self {
        Self::from_handle(self)
    }
}

impl<T, K> Drop for Handle<T, K> {
    fn drop(&mut self) {
        self.heap.state().unregister_handle(self.key);
    }
}

impl<T: 'static, K: HandleKind> fmt::Debug for Handle<T, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(K::NAME)
            .field("key", &self.key)
            .field("target", &self.get())
            .finish()
    }
}

#[cfg(test)]
impl<T, K> Handle<T, K> {
    pub(crate) const fn key(&self) -> HandleKey {
        self.key
    }
}
