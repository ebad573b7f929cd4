use std::time::{Duration, Instant};

use criterion::{BenchmarkId, Criterion};
use exact_pm::protocol::simulate_exact_match;
use tokio::runtime::Runtime;

pub fn exact_match_benchmarks(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let pattern = b"needle";
    let mut g = c.benchmark_group("exact match");
    for text_size in [16, 64, 256] {
        let mut text = vec![b'.'; text_size];
        text[text_size - pattern.len()..].copy_from_slice(pattern);
        let windows = text_size - pattern.len() + 1;
        g.throughput(criterion::Throughput::Elements(windows as u64));
        let bench_id = BenchmarkId::new("windows", windows);

        g.bench_function(bench_id, |b| {
            b.to_async(&rt).iter_custom(|iters| {
                let text = text.clone();
                async move {
                    let mut elapsed = Duration::default();
                    for _ in 0..iters {
                        let now = Instant::now();
                        let (report, _) = simulate_exact_match(pattern, &text, 1)
                            .await
                            .expect("exact match failed");
                        elapsed += now.elapsed();
                        assert!(report.found());
                    }
                    elapsed
                }
            })
        });
    }
    g.finish();
}
