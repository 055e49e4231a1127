//! Classifier benchmarks
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use proxyman_rust::classify::{classify, verdicts};
use proxyman_rust::probe::ProtocolProbeResult;
use proxyman_rust::{Endpoint, Protocol};
use proxyman_rust::store::parse_list;
use std::time::Duration;

/// Roughly the shape of a free-proxy list: most endpoints dead
fn results(n: usize) -> Vec<ProtocolProbeResult> {
    (0..n)
        .map(|i| {
            let endpoint = Endpoint::new(format!("10.{}.{}.{}:{}", (i >> 16) & 0xff, (i >> 8) & 0xff, i & 0xff, 1080 + i % 7));
            if i % 5 == 0 {
                let protocol = Protocol::PRIORITY[i % 4];
                ProtocolProbeResult::success(endpoint, protocol, Duration::from_millis((i % 4000) as u64))
            } else {
                ProtocolProbeResult::failure(endpoint, Protocol::Socks5)
            }
        })
        .collect()
}

fn bench_classify(c: &mut Criterion) {
    let mut group = c.benchmark_group("classify");

    for n in [100usize, 1_000, 10_000] {
        let input = results(n);
        group.throughput(Throughput::Elements(n as u64));

        group.bench_with_input(BenchmarkId::new("classify", n), &input, |b, input| {
            b.iter(|| black_box(classify(input, 2.0)))
        });

        group.bench_with_input(BenchmarkId::new("verdicts", n), &input, |b, input| {
            b.iter(|| black_box(verdicts(input, 2.0)))
        });
    }

    group.finish();
}

fn bench_parse_list(c: &mut Criterion) {
    let content: String = (0..10_000)
        .map(|i| format!("10.0.{}.{}:8080\n", i / 256 % 256, i % 256))
        .collect();

    let mut group = c.benchmark_group("store");
    group.throughput(Throughput::Bytes(content.len() as u64));
    group.bench_function("parse_list_10k", |b| b.iter(|| black_box(parse_list(&content))));
    group.finish();
}

criterion_group!(benches, bench_classify, bench_parse_list);
criterion_main!(benches);
