use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use nativeport_runtime::tracker::{Limits, ReclaimMode};
use nativeport_runtime::{AddressHandle, AllocationTracker, HandleKind, Scope};
use std::time::Duration;

fn unlimited(mode: ReclaimMode) -> std::sync::Arc<AllocationTracker> {
    AllocationTracker::with_limits(
        Limits {
            max_bytes: 0,
            max_physical_bytes: 0,
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        },
        mode,
    )
}

fn bench_allocate_release(c: &mut Criterion) {
    let tracker = unlimited(ReclaimMode::Inline);
    let mut group = c.benchmark_group("allocate_release");
    for count in [1usize, 64, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| {
                let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Int, count).unwrap();
                handle.deallocate();
                black_box(handle.is_null());
            });
        });
    }
    group.finish();
}

fn bench_deferred_drop(c: &mut Criterion) {
    let tracker = unlimited(ReclaimMode::Deferred);
    c.bench_function("drop_then_collect", |b| {
        b.iter(|| {
            drop(AddressHandle::allocate_in(&tracker, HandleKind::Byte, 256).unwrap());
            black_box(tracker.collect());
        });
    });
}

fn bench_scope(c: &mut Criterion) {
    let tracker = unlimited(ReclaimMode::Inline);
    c.bench_function("scope_16_handles", |b| {
        b.iter(|| {
            let scope = Scope::open();
            for _ in 0..16 {
                black_box(AddressHandle::allocate_in(&tracker, HandleKind::Double, 8).unwrap());
            }
            drop(scope);
        });
    });
}

fn bench_fill(c: &mut Criterion) {
    let tracker = unlimited(ReclaimMode::Inline);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Byte, 1 << 16).unwrap();
    c.bench_function("fill_64k", |b| {
        b.iter(|| unsafe {
            handle.fill(black_box(0x5A)).unwrap();
        });
    });
}

criterion_group!(benches, bench_allocate_release, bench_deferred_drop, bench_scope, bench_fill);
criterion_main!(benches);
