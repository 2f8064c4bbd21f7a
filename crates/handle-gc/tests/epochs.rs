//! Epoch flipping and collection history.

use handle_gc::{Heap, HeapConfig};

#[test]
fn test_consecutive_collections_use_different_epochs() {
    let heap = Heap::new();
    let start = heap.epoch();

    let first = heap.collect();
    let second = heap.collect();

    assert_ne!(first.epoch, start);
    assert_ne!(first.epoch, second.epoch);
    assert_eq!(heap.epoch(), second.epoch);
}

#[test]
fn test_allocation_between_collections_is_reclaimed_unless_marked() {
    let heap = Heap::new();
    heap.collect();

    let between = heap.new_gc(1u32);
    let rooted = heap.new_root(2u32);
    let stats = heap.collect();

    assert_eq!(stats.objects_reclaimed, 1);
    assert!(!between.is_valid());
    assert!(rooted.is_valid());
}

#[test]
fn test_survivor_is_reclaimed_once_unrooted() {
    let heap = Heap::new();
    let root = heap.new_root(1u8);
    let probe = handle_gc::Gc::from_handle(&root);

    heap.collect();
    heap.collect();
    assert!(probe.is_valid());

    drop(root);
    heap.collect();
    assert!(!probe.is_valid());
}

#[test]
fn test_new_allocation_is_marked_in_current_epoch() {
    let heap = Heap::new();
    heap.collect();
    let _root = heap.new_root(0u8);
    assert!(heap.allocations()[0].marked);
}

#[test]
fn test_sequence_numbers_and_history() {
    let heap = Heap::with_config(HeapConfig::default().with_history_len(2));
    assert!(heap.last_collection().is_none());

    for _ in 0..3 {
        heap.collect();
    }

    let sequences: Vec<u64> = heap.history().iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, vec![2, 3]);
    assert_eq!(heap.last_collection().map(|s| s.sequence), Some(3));
    assert_eq!(heap.metrics().collections, 3);
}

#[test]
fn test_disabled_history_still_reports_last_collection() {
    let heap = Heap::with_config(HeapConfig::default().with_history_len(0));
    heap.collect();
    assert!(heap.history().is_empty());
    assert_eq!(heap.last_collection().map(|s| s.sequence), Some(1));
}
