//! Submission path benchmarks
//!
//! Measures the software cost of the submit and wait paths with emulated
//! hardware latency set to zero, so the numbers reflect scheduler and fence
//! overhead rather than sleep time.

use std::sync::Arc;
use std::time::Duration;

use criterion::{criterion_group, criterion_main, Criterion};
use schedforge::{Device, DeviceConfig, QueueId};

fn bench_device() -> Arc<Device> {
    Device::new(
        DeviceConfig::new()
            .with_credit_limit(64)
            .with_event_queue_capacity(8192)
            .with_latencies(Duration::ZERO, Duration::ZERO),
    )
    .unwrap()
}

fn bench_submit_wait_round_trip(c: &mut Criterion) {
    let device = bench_device();
    let session = device.open();

    c.bench_function("submit_wait_round_trip", |b| {
        b.iter(|| {
            let handle = session.submit(QueueId::Fast, None).unwrap();
            session.wait(handle, Duration::from_secs(10)).unwrap();
        })
    });
}

fn bench_submit_batch_then_drain(c: &mut Criterion) {
    let device = bench_device();
    let session = device.open();

    c.bench_function("submit_batch_64_then_drain", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..64)
                .map(|_| session.submit(QueueId::Regular, None).unwrap())
                .collect();
            for handle in handles {
                session.wait(handle, Duration::from_secs(10)).unwrap();
            }
        })
    });
}

fn bench_dependency_chain(c: &mut Criterion) {
    let device = bench_device();
    let session = device.open();

    c.bench_function("dependency_chain_16", |b| {
        b.iter(|| {
            let mut prev = None;
            let mut handles = Vec::with_capacity(16);
            for _ in 0..16 {
                let handle = session.submit(QueueId::Fast, prev).unwrap();
                prev = Some(handle);
                handles.push(handle);
            }
            // Retire every handle so the session table stays bounded.
            for handle in handles.into_iter().rev() {
                session.wait(handle, Duration::from_secs(10)).unwrap();
            }
        })
    });
}

criterion_group!(
    benches,
    bench_submit_wait_round_trip,
    bench_submit_batch_then_drain,
    bench_dependency_chain
);
criterion_main!(benches);
