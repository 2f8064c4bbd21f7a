//! Benchmark: collection pause versus heap population.
//!
//! Marking scans every reachable object's bytes, so pause time grows with
//! the size of the live graph; sweeping grows with the number of dead
//! objects.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use handle_gc::{Gc, Heap, Root};
use std::hint::black_box;

struct Node {
    value: i64,
    next: Gc<Node>,
}

/// Build a rooted singly linked chain, returning its head and tail.
fn build_chain(heap: &Heap, len: usize) -> (Root<Node>, Gc<Node>) {
    let head = heap.new_root(Node {
        value: 0,
        next: heap.null_gc(),
    });
    let mut tail = Gc::from_handle(&head);
    for i in 1..len {
        let node = heap.new_gc(Node {
            value: i64::try_from(i).unwrap_or(i64::MAX),
            next: heap.null_gc(),
        });
        // SAFETY: `tail` is reachable from `head`; no collection runs here.
        unsafe { tail.as_ref() }.unwrap().next.set(&node);
        tail = node;
    }
    (head, tail)
}

fn bench_live_chain(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect_live_chain");
    for len in [100, 1_000, 10_000] {
        let heap = Heap::new();
        let (head, _) = build_chain(&heap, len);
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, _| {
            b.iter(|| black_box(heap.collect()));
        });
        black_box(&head);
    }
    group.finish();
}

fn bench_garbage(c: &mut Criterion) {
    let mut group = c.benchmark_group("collect_garbage");
    for count in [100, 1_000] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let heap = Heap::new();
            b.iter(|| {
                for i in 0..count {
                    heap.allocate(Node {
                        value: i,
                        next: heap.null_gc(),
                    });
                }
                black_box(heap.collect())
            });
        });
    }
    group.finish();
}

fn bench_reachable_cycle(c: &mut Criterion) {
    c.bench_function("collect_rooted_cycle_1000", |b| {
        let heap = Heap::new();
        let (head, tail) = build_chain(&heap, 1_000);
        // Close the chain into a ring.
        // SAFETY: `tail` is reachable from `head`; no collection runs here.
        unsafe { tail.as_ref() }.unwrap().next.set(&head);
        b.iter(|| black_box(heap.collect()));
        // SAFETY: `head` is a root, so the ring survived every collection.
        black_box(unsafe { head.as_ref() }.map(|n| n.value));
    });
}

criterion_group!(benches, bench_live_chain, bench_garbage, bench_reachable_cycle);
criterion_main!(benches);
