//! GC tracing support.
//!
//! When the `tracing` feature is enabled, this module provides structured
//! tracing spans and events for allocation, release and collection. Without
//! the feature every hook is an empty inline function.

use std::panic::Location;

/// High-level GC phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcPhase {
    /// Trace live objects from the roots.
    Mark,
    /// Reclaim unmarked objects.
    Sweep,
}

#[cfg(feature = "tracing")]
pub mod internal {
    use ::tracing::{span, Level};

    use super::GcPhase;

    /// Create a span for the entire collection, keyed by its sequence number.
    pub fn trace_collection(sequence: u64) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_collect", gc_id = sequence).entered()
    }

    /// Create a span for a GC phase.
    pub fn trace_phase(phase: GcPhase) -> span::EnteredSpan {
        span!(Level::DEBUG, "gc_phase", phase = ?phase).entered()
    }
}

/// Log the start of a GC phase.
#[cfg(feature = "tracing")]
pub fn log_phase_start(phase: GcPhase, bytes_before: usize) {
    ::tracing::debug!(phase = ?phase, bytes_before, "phase_start");
}

/// Log the end of a GC phase. `count` is objects marked for the mark phase
/// and bytes reclaimed for the sweep phase.
#[cfg(feature = "tracing")]
pub fn log_phase_end(phase: GcPhase, count: usize) {
    ::tracing::debug!(phase = ?phase, count, "phase_end");
}

#[cfg(feature = "tracing")]
pub fn log_allocate(size: usize, location: &'static Location<'static>) {
    ::tracing::trace!(size, file = location.file(), line = location.line(), "allocate");
}

#[cfg(feature = "tracing")]
pub fn log_release(size: usize, location: &'static Location<'static>) {
    ::tracing::trace!(size, file = location.file(), line = location.line(), "release");
}

/// A raw allocation was freed without ever learning its destructor.
#[cfg(feature = "tracing")]
pub fn log_missing_destructor(size: usize, location: &'static Location<'static>) {
    ::tracing::warn!(
        size,
        file = location.file(),
        line = location.line(),
        "reclaimed allocation had no destructor"
    );
}

#[cfg(not(feature = "tracing"))]
#[inline]
pub const fn log_phase_start(_phase: GcPhase, _bytes_before: usize) {}

#[cfg(not(feature = "tracing"))]
#[inline]
pub const fn log_phase_end(_phase: GcPhase, _count: usize) {}

#[cfg(not(feature = "tracing"))]
#[inline]
pub const fn log_allocate(_size: usize, _location: &'static Location<'static>) {}

#[cfg(not(feature = "tracing"))]
#[inline]
pub const fn log_release(_size: usize, _location: &'static Location<'static>) {}

#[cfg(not(feature = "tracing"))]
#[inline]
pub const fn log_missing_destructor(_size: usize, _location: &'static Location<'static>) {}
