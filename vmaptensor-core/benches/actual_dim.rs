use criterion::{criterion_group, criterion_main, Criterion};
use vmaptensor_core::{make_batched, maybe_get_batched, BatchDim, Tensor, VMAP_MAX_TENSOR_DIMS};

fn bench_actual_dim_max_rank(c: &mut Criterion) {
    let x = Tensor::<u8>::zeros(&[1; VMAP_MAX_TENSOR_DIMS]);
    let bdims = [3, 17, 31, 40, 62]
        .into_iter()
        .enumerate()
        .map(|(l, d)| BatchDim::new(l as i64, d));
    let bt = make_batched(x, bdims).unwrap();
    let batched = maybe_get_batched(&bt).unwrap();
    c.bench_function("actual_dim_rank64_last_public_dim", |bencher| {
        bencher.iter(|| batched.actual_dim(std::hint::black_box(-1), true).unwrap());
    });
}

criterion_group!(benches, bench_actual_dim_max_rank);
criterion_main!(benches);
