use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use relaylink_core::socks5::connect_request;
use relaylink_core::{FailureHistory, NegotiationConfig, compute_digest};
use std::time::Duration;

fn bench_digest(c: &mut Criterion) {
    c.bench_function("compute_digest", |b| {
        b.iter(|| {
            compute_digest(
                black_box("js5_3f9a1c7e2b4d6f8a0c1e3a5b"),
                black_box("alice@example.org/home"),
                black_box("bob@example.org/work"),
            )
        })
    });
}

fn bench_connect_request(c: &mut Criterion) {
    let digest = compute_digest("sid", "alice@example.org/home", "bob@example.org/work");
    c.bench_function("connect_request", |b| {
        b.iter(|| connect_request(black_box(&digest)))
    });
}

fn bench_failure_history(c: &mut Criterion) {
    let mut group = c.benchmark_group("failure_history");

    for entries in [10usize, 100] {
        let history = FailureHistory::new(entries, Duration::from_secs(7200));
        let keys: Vec<String> = (0..entries).map(|i| format!("10.0.0.{i}:7777")).collect();
        for key in &keys {
            history.record_failure(key);
        }

        group.bench_with_input(BenchmarkId::new("lookup", entries), &keys, |b, keys| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % keys.len();
                history.failure_count(black_box(&keys[i]))
            })
        });
    }

    // Every insert beyond capacity runs an eviction
    let history = FailureHistory::new(100, Duration::from_secs(7200));
    let mut next = 0u32;
    group.bench_function("record_with_eviction", |b| {
        b.iter(|| {
            next = next.wrapping_add(1);
            history.record_failure(black_box(&format!("192.0.2.{next}:1080")))
        })
    });

    group.finish();
}

fn bench_per_host_timeout(c: &mut Criterion) {
    let config = NegotiationConfig::default();
    c.bench_function("per_host_timeout", |b| {
        b.iter(|| config.per_host_timeout(black_box(7)))
    });
}

criterion_group!(
    benches,
    bench_digest,
    bench_connect_request,
    bench_failure_history,
    bench_per_host_timeout
);
criterion_main!(benches);
