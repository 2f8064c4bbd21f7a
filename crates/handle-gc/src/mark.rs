//! Mark phase.
//!
//! There is no explicit object graph. An object references another when a
//! handle bound to the second one is stored inside the first one's bytes,
//! so marking an object means scanning its memory for handle keys and
//! following the bound ones. A key only counts when the heap link stored
//! after it names this heap, so a slot a handle was moved out of is not an
//! edge. The cost is proportional to the total size of the reachable
//! objects.

use crate::heap::HeapState;
use crate::metrics::CollectStats;
use crate::registry::RecordKey;
use crate::scan::scan_region;
use crate::tracing;

/// Mark every allocation reachable from a bound root handle with the
/// current epoch. `owner` is the heap-interior address that embedded
/// handles of this heap carry after their key.
///
/// Roots whose target has been freed contribute nothing. Objects already
/// carrying the current epoch are never rescanned, which is what makes
/// cycles terminate.
pub fn mark_from_roots(state: &mut HeapState, owner: usize, stats: &mut CollectStats) {
    #[cfg(feature = "tracing")]
    let _phase = tracing::internal::trace_phase(tracing::GcPhase::Mark);
    tracing::log_phase_start(tracing::GcPhase::Mark, state.registry.allocated_bytes());

    let epoch = state.epoch;
    let HeapState {
        registry, handles, ..
    } = state;

    let mut worklist: Vec<RecordKey> = handles.root_targets().collect();
    stats.roots_traced = worklist.len();

    while let Some(key) = worklist.pop() {
        let Some(record) = registry.get_mut(key) else {
            continue;
        };
        if record.mark == epoch {
            continue;
        }
        record.mark = epoch;
        stats.objects_marked += 1;

        let (address, size) = (record.address, record.size);
        let registry = &*registry;
        // SAFETY: a registered record owns at least `size` readable bytes.
        stats.words_scanned += unsafe {
            scan_region(address, size, owner, |embedded| {
                let target = handles.get(embedded).and_then(|entry| entry.record);
                if let Some(target) = target {
                    if registry.get(target).is_some_and(|r| r.mark != epoch) {
                        worklist.push(target);
                    }
                }
            })
        };
    }

    tracing::log_phase_end(tracing::GcPhase::Mark, stats.objects_marked);
}
