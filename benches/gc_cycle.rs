use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ome_rt::alloc::{allocate_array, allocate_string};
use ome_rt::collect::collect;
use ome_rt::context::Context;
use ome_rt::heap::Heap;
use ome_rt::value::Value;
use std::mem::size_of;

fn test_context() -> Context {
    let heap = Heap::new(1 << 24, 1 << 20, 1 << 26, 50).unwrap();
    Context::new(256, heap)
}

pub fn bench_gc(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_cycle");
    group.sample_size(20);

    for &n in &[1_000usize, 10_000, 50_000] {
        group.bench_function(BenchmarkId::new("unrooted", n), |b| {
            b.iter_batched_ref(
                test_context,
                |ctx| {
                    for _ in 0..n {
                        allocate_string(ctx, b"garbage").unwrap();
                    }
                    collect(ctx);
                },
                criterion::BatchSize::LargeInput,
            );
        });

        group.bench_function(BenchmarkId::new("rooted", n), |b| {
            b.iter_batched_ref(
                test_context,
                |ctx| {
                    let frame = ctx.enter(1).unwrap();
                    let array = allocate_array(ctx, n as u32).unwrap();
                    frame.save(ctx, 0, Value::tag_pointer(ome_rt::value::Tag::ARRAY, array));
                    for i in 0..n {
                        let v = allocate_string(ctx, b"keep me").unwrap();
                        // `allocate_string` may have collected and moved `array`;
                        // always re-derive the element pointer from the root.
                        let array = frame.load(ctx, 0).untag_pointer();
                        let elems = unsafe { array.add(size_of::<u64>()) as *mut Value };
                        unsafe { elems.add(i).write(v) };
                    }
                    collect(ctx);
                    frame.leave(ctx, Value::boolean(true));
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_gc);
criterion_main!(benches);
