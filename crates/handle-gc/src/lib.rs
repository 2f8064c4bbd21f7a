//! An embeddable mark-sweep garbage collector with conservative reference
//! discovery.
//!
//! `handle-gc` reclaims objects that are no longer reachable from a set of
//! root handles, cycles included. It needs no `Trace` implementations: the
//! collector finds out which objects refer to which by scanning each
//! reachable object's memory for the handles stored inside it.
//!
//! # Model
//!
//! - A [`Heap`] is the collector context. It owns the allocation registry,
//!   the table of live handles, the allocated-byte counter and the epoch
//!   flag.
//! - [`Root<T>`] handles anchor reachability. Keep them in locals or in
//!   unmanaged data.
//! - [`Gc<T>`] handles are the edges of the object graph. Store them inline
//!   in managed objects.
//! - [`Heap::collect`] is only ever run when called. It marks from the
//!   roots, then reclaims everything unmarked, unbinding every handle that
//!   pointed at a reclaimed object.
//!
//! # Quick Start
//!
//! ```
//! use handle_gc::{Gc, Heap};
//!
//! struct Node {
//!     next: Gc<Node>,
//! }
//!
//! let heap = Heap::new();
//! let a = heap.new_gc(Node { next: heap.null_gc() });
//! let b = heap.new_gc(Node { next: heap.null_gc() });
//!
//! // Create cycle: a -> b -> a
//! // SAFETY: both objects are live and no collection runs meanwhile.
//! unsafe {
//!     a.as_ref().unwrap().next.set(&b);
//!     b.as_ref().unwrap().next.set(&a);
//! }
//!
//! // No root points into the cycle.
//! let stats = heap.collect();
//! assert_eq!(stats.objects_reclaimed, 2);
//! assert!(!a.is_valid() && !b.is_valid());
//! ```
//!
//! # Thread Safety
//!
//! `Heap` and its handles are `!Send` and `!Sync`. Collection never runs
//! concurrently with anything else.

#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod handles;
mod heap;
mod info;
mod mark;
mod metrics;
mod registry;
mod scan;
mod sweep;
mod tracing;

// Re-export public API
pub use config::HeapConfig;
pub use handles::{Gc, Handle, HandleKind, Member, Root, Rooted};
pub use heap::{Epoch, Heap};
pub use info::AllocationInfo;
pub use metrics::{CollectStats, HeapMetrics};
