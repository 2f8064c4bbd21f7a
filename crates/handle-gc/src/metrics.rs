//! GC metrics and statistics.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::heap::Epoch;

/// Statistics from one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectStats {
    /// 1-based number of this collection on its heap.
    pub sequence: u64,
    /// Epoch the collection marked with.
    pub epoch: Epoch,
    /// Wall time of the whole collection, destructors included.
    pub duration: Duration,
    /// Duration of the mark phase.
    pub mark_duration: Duration,
    /// Duration of the sweep phase, destructors included.
    pub sweep_duration: Duration,
    /// Bound root handles the mark phase started from.
    pub roots_traced: usize,
    /// Objects marked live.
    pub objects_marked: usize,
    /// Words of object memory inspected for embedded handles.
    pub words_scanned: usize,
    /// Number of objects reclaimed.
    pub objects_reclaimed: usize,
    /// Number of bytes reclaimed.
    pub bytes_reclaimed: usize,
    /// Number of objects surviving.
    pub objects_surviving: usize,
    /// Number of bytes surviving.
    pub bytes_surviving: usize,
    /// Handles unbound because their target was reclaimed.
    pub handles_invalidated: usize,
    /// Reclaimed raw allocations that never had a destructor captured.
    pub destructors_skipped: usize,
}

impl CollectStats {
    pub(crate) const fn new(sequence: u64, epoch: Epoch) -> Self {
        Self {
            sequence,
            epoch,
            duration: Duration::ZERO,
            mark_duration: Duration::ZERO,
            sweep_duration: Duration::ZERO,
            roots_traced: 0,
            objects_marked: 0,
            words_scanned: 0,
            objects_reclaimed: 0,
            bytes_reclaimed: 0,
            objects_surviving: 0,
            bytes_surviving: 0,
            handles_invalidated: 0,
            destructors_skipped: 0,
        }
    }
}

/// Internal helper for capturing phase durations.
#[derive(Debug, Clone, Copy)]
pub struct PhaseTimer {
    /// Accumulated mark phase time.
    pub mark: Duration,
    /// Accumulated sweep phase time.
    pub sweep: Duration,
    current_start: Option<Instant>,
}

impl PhaseTimer {
    pub const fn new() -> Self {
        Self {
            mark: Duration::ZERO,
            sweep: Duration::ZERO,
            current_start: None,
        }
    }

    /// Start timing a phase.
    pub fn start(&mut self) {
        self.current_start = Some(Instant::now());
    }

    /// End the mark phase and record its duration.
    pub fn end_mark(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.mark = start.elapsed();
        }
    }

    /// End the sweep phase and record its duration.
    pub fn end_sweep(&mut self) {
        if let Some(start) = self.current_start.take() {
            self.sweep = start.elapsed();
        }
    }
}

/// Cumulative statistics for one heap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapMetrics {
    /// Collections run.
    pub collections: u64,
    /// Objects reclaimed by collections.
    pub objects_reclaimed: usize,
    /// Bytes reclaimed by collections.
    pub bytes_reclaimed: usize,
    /// Successful calls to `Heap::release`.
    pub explicit_releases: usize,
    /// Allocations freed without a destructor, by collection or release.
    pub destructors_skipped: usize,
    /// Total time spent collecting.
    pub total_pause: Duration,
    /// Highest value the allocated-byte counter has reached.
    pub peak_allocated_bytes: usize,
}

impl HeapMetrics {
    pub(crate) const fn new() -> Self {
        Self {
            collections: 0,
            objects_reclaimed: 0,
            bytes_reclaimed: 0,
            explicit_releases: 0,
            destructors_skipped: 0,
            total_pause: Duration::ZERO,
            peak_allocated_bytes: 0,
        }
    }

    pub(crate) fn note_allocated(&mut self, allocated_bytes: usize) {
        self.peak_allocated_bytes = self.peak_allocated_bytes.max(allocated_bytes);
    }

    pub(crate) fn record(&mut self, stats: &CollectStats) {
        self.collections += 1;
        self.objects_reclaimed += stats.objects_reclaimed;
        self.bytes_reclaimed += stats.bytes_reclaimed;
        self.destructors_skipped += stats.destructors_skipped;
        self.total_pause += stats.duration;
    }
}

/// Bounded ring of recent collections.
#[derive(Debug)]
pub struct GcHistory {
    entries: VecDeque<CollectStats>,
    capacity: usize,
    latest: Option<CollectStats>,
}

impl GcHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            latest: None,
        }
    }

    pub fn push(&mut self, stats: CollectStats) {
        self.latest = Some(stats);
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(stats);
    }

    pub const fn latest(&self) -> Option<CollectStats> {
        self.latest
    }

    pub fn iter(&self) -> impl Iterator<Item = &CollectStats> + '_ {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_keeps_most_recent() {
        let mut history = GcHistory::new(2);
        for sequence in 1..=3 {
            history.push(CollectStats::new(sequence, Epoch::INITIAL));
        }
        let kept: Vec<u64> = history.iter().map(|s| s.sequence).collect();
        assert_eq!(kept, vec![2, 3]);
        assert_eq!(history.latest().map(|s| s.sequence), Some(3));
    }

    #[test]
    fn test_zero_capacity_still_tracks_latest() {
        let mut history = GcHistory::new(0);
        history.push(CollectStats::new(1, Epoch::INITIAL));
        assert_eq!(history.iter().count(), 0);
        assert!(history.latest().is_some());
    }

    #[test]
    fn test_metrics_accumulate() {
        let mut metrics = HeapMetrics::new();
        let mut stats = CollectStats::new(1, Epoch::INITIAL);
        stats.objects_reclaimed = 3;
        stats.bytes_reclaimed = 48;
        metrics.record(&stats);
        metrics.record(&stats);

        assert_eq!(metrics.collections, 2);
        assert_eq!(metrics.objects_reclaimed, 6);
        assert_eq!(metrics.bytes_reclaimed, 96);
    }
}
