//! Benchmarks for the reduction driver on the simulated device

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use kernelctx::{Context, ElementType, HostArray};

fn bench_reduce_sum(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_sum");
    group.sample_size(10);

    for size in [256usize, 4_096, 16_384].iter() {
        let data = HostArray::from((0..*size as u32).collect::<Vec<u32>>());
        group.bench_with_input(BenchmarkId::new("one_shot", size), &data, |b, data| {
            let mut ctx = Context::new().expect("context");
            b.iter(|| {
                ctx.reduce(black_box(data), "a + b", None, Some(32))
                    .expect("reduce")
            })
        });
    }

    group.finish();
}

fn bench_local_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("reduce_local_size");
    group.sample_size(10);

    let data = HostArray::from((0..4_096).map(|v| v as f32).collect::<Vec<f32>>());
    for local in [8usize, 32, 128].iter() {
        group.bench_with_input(BenchmarkId::new("prebuilt", local), local, |b, &local| {
            let mut ctx = Context::new().expect("context");
            let kernel = ctx
                .reduction_kernel(ElementType::Float32, "a + b", None, Some(local))
                .expect("kernel");
            let input = ctx.transfer_to_device(&data).expect("transfer");
            b.iter(|| kernel.run(&mut ctx, input, black_box(data.len()), None).expect("run"))
        });
    }

    group.finish();
}

fn bench_map(c: &mut Criterion) {
    let x = HostArray::from((0..4_096).map(|v| v as f32).collect::<Vec<f32>>());
    let y = x.clone();
    c.bench_function("map_mul_4096", |b| {
        let mut ctx = Context::new().expect("context");
        b.iter(|| {
            ctx.map(&["x", "y"], "x[i] * y[i]", black_box(&[x.clone(), y.clone()]))
                .expect("map")
        })
    });
}

criterion_group!(benches, bench_reduce_sum, bench_local_sizes, bench_map);
criterion_main!(benches);
