//! Heap allocation and collection benchmarks.
//!
//! Run with `cargo bench -p garnet_gc`.

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use garnet_gc::{Cell, CollectionType, GcConfig, Heap};

struct Blob {
    data: [u8; 40],
}

unsafe impl Cell for Blob {
    fn class_name(&self) -> &'static str {
        "Blob"
    }
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");
    group.throughput(Throughput::Bytes(64));

    group.bench_function("allocate_64b", |b| {
        let mut heap = Heap::new(GcConfig::deterministic());
        b.iter(|| black_box(heap.allocate(Blob { data: [0; 40] })));
    });

    group.finish();
}

fn bench_collection(c: &mut Criterion) {
    let mut group = c.benchmark_group("collection");
    group.sample_size(20);

    group.bench_function("collect_10k_unrooted", |b| {
        b.iter_batched(
            || {
                let mut heap = Heap::new(GcConfig::deterministic());
                for _ in 0..10_000 {
                    heap.allocate(Blob { data: [0; 40] });
                }
                heap
            },
            |mut heap| heap.collect_garbage(CollectionType::CollectGarbage, false),
            BatchSize::LargeInput,
        );
    });

    group.bench_function("collect_10k_rooted", |b| {
        b.iter_batched(
            || {
                let mut heap = Heap::new(GcConfig::deterministic());
                let handles: Vec<_> = (0..10_000)
                    .map(|_| {
                        let ptr = heap.allocate(Blob { data: [0; 40] });
                        heap.make_handle(ptr)
                    })
                    .collect();
                (heap, handles)
            },
            |(mut heap, handles)| {
                heap.collect_garbage(CollectionType::CollectGarbage, false);
                handles
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_allocation, bench_collection);
criterion_main!(benches);
