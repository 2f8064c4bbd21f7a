//! Sweep phase.

use crate::heap::HeapState;
use crate::metrics::CollectStats;
use crate::registry::{RecordKey, Unlinked};
use crate::tracing;

/// Unlink every allocation not marked in the current epoch.
///
/// The condemned set is gathered before anything is removed. Each
/// condemned record leaves the registry (and the byte counter) and every
/// handle still bound to it is unbound. Memory is not touched here; the
/// caller passes the result to [`reclaim`] once it no longer holds the
/// heap state.
pub fn condemn(state: &mut HeapState, stats: &mut CollectStats) -> Vec<Unlinked> {
    #[cfg(feature = "tracing")]
    let _phase = tracing::internal::trace_phase(tracing::GcPhase::Sweep);
    tracing::log_phase_start(tracing::GcPhase::Sweep, state.registry.allocated_bytes());

    let epoch = state.epoch;
    let condemned: Vec<RecordKey> = state
        .registry
        .iter()
        .filter(|(_, record)| record.mark != epoch)
        .map(|(key, _)| key)
        .collect();

    let mut unlinked = Vec::with_capacity(condemned.len());
    for key in condemned {
        if let Some((dead, invalidated)) = state.unlink(key) {
            stats.objects_reclaimed += 1;
            stats.bytes_reclaimed += dead.size;
            stats.handles_invalidated += invalidated;
            unlinked.push(dead);
        }
    }

    tracing::log_phase_end(tracing::GcPhase::Sweep, stats.bytes_reclaimed);
    unlinked
}

/// Destroy and free unlinked allocations in order. Returns how many had no
/// destructor to run.
///
/// Must be called without the heap state borrowed: destructors drop the
/// handles embedded in their objects, and those deregister themselves.
pub fn reclaim(unlinked: Vec<Unlinked>) -> usize {
    let mut skipped = 0;
    for dead in unlinked {
        let (size, location) = (dead.size, dead.location);
        // SAFETY: `dead` left the registry and every handle to it was
        // unbound, so nothing else can reach this memory.
        if !unsafe { dead.reclaim() } {
            skipped += 1;
            tracing::log_missing_destructor(size, location);
        }
    }
    skipped
}
