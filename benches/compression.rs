use std::hint::black_box;

use criterion::Criterion;
use exact_pm::{
    crypto::{AesCompressor, Compressor},
    protocol::fold_block,
};

pub fn compression_benchmark(c: &mut Criterion) {
    let compressor = AesCompressor::default();
    let diff: Vec<u8> = (0..64).collect();

    let mut g = c.benchmark_group("compression");
    g.throughput(criterion::Throughput::Elements(1));
    g.bench_function("fold and compress 64 bytes", |b| {
        b.iter(|| compressor.compress(&fold_block(black_box(&diff))))
    });
    g.finish();
}
