//! Fan-out benchmarks for the locastream registry.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use locastream_bench::{drain, populate, route_frame};
use locastream_core::Registry;
use locastream_transport::{Connection, MemoryConnection};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Runtime;

/// Broadcast one sample to N in-memory viewers.
fn bench_broadcast(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("broadcast");

    for viewers in [1usize, 16, 256, 1024] {
        let registry = Registry::new();
        let mut peers = populate(&registry, viewers);
        let frame = route_frame(1);

        group.throughput(Throughput::Elements(viewers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(viewers), &viewers, |b, _| {
            b.iter_custom(|iters| {
                let start = Instant::now();
                for _ in 0..iters {
                    rt.block_on(registry.broadcast(black_box(&frame), None));
                    drain(&mut peers);
                }
                start.elapsed()
            });
        });
    }

    group.finish();
}

/// Registry churn: register and deregister while members are present.
fn bench_register_deregister(c: &mut Criterion) {
    let registry = Registry::new();
    let _peers = populate(&registry, 1024);

    c.bench_function("register_deregister", |b| {
        b.iter(|| {
            let (conn, _peer) = MemoryConnection::pair();
            let id = conn.id().clone();
            registry.register(Arc::new(conn));
            registry.deregister(black_box(&id));
        });
    });
}

criterion_group!(benches, bench_broadcast, bench_register_deregister);
criterion_main!(benches);
