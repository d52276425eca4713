use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use segalloc::{Heap, HeapConfig};

fn heap() -> Heap {
    Heap::with_config(HeapConfig::new().with_max_pages(4096))
}

fn alloc_free_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc free cycle");

    for size in [8, 64, 104, 256, 1024, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let mut heap = heap();
            b.iter(|| {
                let ptr = heap.allocate(black_box(size)).unwrap().unwrap();
                heap.free(ptr);
            });
        });
    }

    group.finish();
}

fn alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc burst");

    for quick_list_max in [0, 5, 64] {
        group.bench_with_input(
            BenchmarkId::new("1000x64B", quick_list_max),
            &quick_list_max,
            |b, &quick_list_max| {
                let mut heap = Heap::with_config(HeapConfig::new().with_quick_list_max(quick_list_max));
                let mut ptrs = Vec::with_capacity(1000);
                b.iter(|| {
                    for _ in 0..1000 {
                        ptrs.push(heap.allocate(64).unwrap().unwrap());
                    }
                    for ptr in ptrs.drain(..) {
                        heap.free(ptr);
                    }
                });
            },
        );
    }

    group.finish();
}

fn resize_growth(c: &mut Criterion) {
    c.bench_function("resize doubling", |b| {
        let mut heap = heap();
        b.iter(|| {
            let mut ptr = heap.allocate(8).unwrap().unwrap();
            let mut size = 8;
            while size < 8192 {
                size *= 2;
                ptr = heap.resize(ptr, size).unwrap().unwrap();
            }
            heap.free(ptr);
        });
    });
}

fn aligned(c: &mut Criterion) {
    let mut group = c.benchmark_group("aligned allocate");

    for align in [32, 256, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(align), &align, |b, &align| {
            let mut heap = heap();
            b.iter(|| {
                let ptr = heap.aligned_allocate(100, black_box(align)).unwrap().unwrap();
                heap.free(ptr);
            });
        });
    }

    group.finish();
}

criterion_group!(benches, alloc_free_cycle, alloc_burst, resize_growth, aligned);
criterion_main!(benches);
