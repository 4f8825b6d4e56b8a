//! Tests for admission, accounting and reclamation

use super::*;
use crate::handle::{AddressHandle, HandleKind};
use std::sync::atomic::AtomicUsize;
use std::time::Instant;

fn limits(max_bytes: usize, max_retries: u32) -> Limits {
    Limits {
        max_bytes,
        max_physical_bytes: 0,
        max_retries,
        retry_delay: Duration::from_millis(10),
    }
}

fn wait_until(deadline: Duration, mut done: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

#[test]
fn registration_drop_removes_entry() {
    let tracker = AllocationTracker::with_limits(limits(0, 0), ReclaimMode::Deferred);

    let first = tracker.try_admit(1, 100).unwrap();
    let second = tracker.try_admit(2, 28).unwrap();
    assert_eq!(tracker.total_bytes(), 128);
    assert_eq!(tracker.live_entries(), vec![(2, 28), (1, 100)]);
    assert!(tracker.is_registered(first.id()));

    let id = first.id();
    drop(first);
    assert!(!tracker.is_registered(id));
    assert_eq!(tracker.total_bytes(), 28);

    drop(second);
    assert_eq!(
        tracker.stats(),
        TrackerStats {
            total_bytes: 0,
            live_entries: 0,
            pending_releases: 0,
        }
    );
}

#[test]
fn refusal_reports_tracked_ceiling() {
    let tracker = AllocationTracker::with_limits(limits(1000, 0), ReclaimMode::Deferred);
    let _held = tracker.try_admit(1, 900).unwrap();

    let err = tracker.try_admit(2, 200).unwrap_err();
    assert_eq!(
        err,
        Error::OutOfMemory {
            ceiling: Ceiling::TrackedBytes,
            attempted: 200,
            current: 900,
            limit: 1000,
        }
    );
    assert_eq!(
        err.to_string(),
        "Failed to allocate memory within limits: totalBytes (900 + 200) > maxBytes (1000)"
    );
    assert_eq!(tracker.total_bytes(), 900);
}

#[test]
fn exact_fit_is_admitted() {
    let tracker = AllocationTracker::with_limits(limits(64, 0), ReclaimMode::Deferred);
    let _a = tracker.try_admit(1, 32).unwrap();
    let _b = tracker.try_admit(2, 32).unwrap();
    assert!(tracker.try_admit(3, 1).is_err());
}

#[test]
fn concurrent_admissions_never_overshoot() {
    let tracker = AllocationTracker::with_limits(limits(1024, 0), ReclaimMode::Deferred);
    let admitted = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8u64)
        .map(|worker| {
            let tracker = Arc::clone(&tracker);
            let admitted = Arc::clone(&admitted);
            std::thread::spawn(move || {
                let mut held = Vec::new();
                for i in 0..100 {
                    if let Ok(registration) = tracker.try_admit(worker * 1000 + i, 64) {
                        admitted.fetch_add(1, Ordering::SeqCst);
                        assert!(tracker.total_bytes() <= 1024);
                        held.push(registration);
                    }
                }
                held
            })
        })
        .collect();

    let held: Vec<Vec<Registration>> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(admitted.load(Ordering::SeqCst), 16);
    assert_eq!(tracker.total_bytes(), 1024);

    drop(held);
    assert_eq!(tracker.total_bytes(), 0);
}

#[test]
fn dropped_handles_wait_for_collect() {
    let tracker = AllocationTracker::with_limits(limits(0, 0), ReclaimMode::Deferred);

    let handles: Vec<_> = (0..5)
        .map(|_| AddressHandle::allocate_in(&tracker, HandleKind::Long, 8).unwrap())
        .collect();
    assert_eq!(tracker.total_bytes(), 5 * 64);

    drop(handles);
    assert_eq!(tracker.total_bytes(), 5 * 64);
    assert_eq!(tracker.stats().pending_releases, 5);

    assert_eq!(tracker.collect(), 5);
    assert_eq!(tracker.total_bytes(), 0);
    assert_eq!(tracker.stats().live_entries, 0);
}

#[test]
fn inline_mode_releases_on_drop() {
    let tracker = AllocationTracker::with_limits(limits(0, 0), ReclaimMode::Inline);
    let released = Arc::new(AtomicUsize::new(0));

    let mut handle = AddressHandle::from_address(HandleKind::Base, 0x1000);
    handle.set_capacity(256);
    let counter = Arc::clone(&released);
    handle
        .set_deallocator_in(&tracker, Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
    assert_eq!(tracker.total_bytes(), 256);

    drop(handle);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(tracker.total_bytes(), 0);
    assert_eq!(tracker.collect(), 0);
}

#[test]
fn retry_reclaims_dropped_handles() {
    let tracker = AllocationTracker::with_limits(limits(64, 3), ReclaimMode::Deferred);

    let full = AddressHandle::allocate_in(&tracker, HandleKind::Int, 16).unwrap();
    drop(full);
    assert_eq!(tracker.total_bytes(), 64);

    let again = AddressHandle::allocate_in(&tracker, HandleKind::Int, 16).unwrap();
    assert!(!again.is_null());
    assert_eq!(tracker.total_bytes(), 64);
}

#[test]
fn retries_give_up_after_the_limit() {
    let tracker = AllocationTracker::with_limits(limits(10, 2), ReclaimMode::Deferred);
    let _held = tracker.try_admit(1, 10).unwrap();

    let start = Instant::now();
    assert!(tracker.try_admit(2, 1).is_err());
    assert!(start.elapsed() >= Duration::from_millis(20));
}

#[test]
fn interrupt_aborts_waiting_admissions() {
    let tracker = AllocationTracker::with_limits(
        Limits {
            max_bytes: 10,
            max_physical_bytes: 0,
            max_retries: 500,
            retry_delay: Duration::from_millis(20),
        },
        ReclaimMode::Deferred,
    );
    let _held = tracker.try_admit(1, 10).unwrap();

    let waiter = {
        let tracker = Arc::clone(&tracker);
        std::thread::spawn(move || tracker.try_admit(2, 5))
    };
    std::thread::sleep(Duration::from_millis(50));
    tracker.interrupt();

    let outcome = waiter.join().unwrap();
    assert!(matches!(
        outcome,
        Err(Error::OutOfMemory {
            ceiling: Ceiling::TrackedBytes,
            ..
        })
    ));
}

#[test]
fn release_wakes_waiting_admission() {
    let tracker = AllocationTracker::with_limits(
        Limits {
            max_bytes: 10,
            max_physical_bytes: 0,
            max_retries: 1000,
            retry_delay: Duration::from_millis(20),
        },
        ReclaimMode::Deferred,
    );
    let held = tracker.try_admit(1, 10).unwrap();

    let waiter = {
        let tracker = Arc::clone(&tracker);
        std::thread::spawn(move || tracker.try_admit(2, 10).map(|r| r.bytes()))
    };
    std::thread::sleep(Duration::from_millis(30));
    drop(held);

    assert_eq!(waiter.join().unwrap(), Ok(10));
}

#[test]
fn reclaimer_thread_drains_the_queue() {
    let tracker = AllocationTracker::with_limits(limits(0, 0), ReclaimMode::Deferred);
    tracker.spawn_reclaimer().unwrap();
    tracker.spawn_reclaimer().unwrap();

    for _ in 0..10 {
        drop(AddressHandle::allocate_in(&tracker, HandleKind::Byte, 128).unwrap());
    }
    assert!(wait_until(Duration::from_secs(5), || tracker.total_bytes() == 0));
}

#[test]
fn inline_mode_never_spawns_a_reclaimer() {
    let tracker = AllocationTracker::with_limits(limits(0, 0), ReclaimMode::Inline);
    tracker.spawn_reclaimer().unwrap();
    assert!(!tracker.reclaimer_running.load(Ordering::Acquire));
}

#[cfg(target_os = "linux")]
#[test]
fn physical_ceiling_refuses_when_exceeded() {
    let tracker = AllocationTracker::with_limits(
        Limits {
            max_bytes: 0,
            max_physical_bytes: 1,
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        },
        ReclaimMode::Deferred,
    );
    match tracker.try_admit(1, 8) {
        Err(Error::OutOfMemory {
            ceiling, limit, ..
        }) => {
            assert_eq!(ceiling, Ceiling::PhysicalBytes);
            assert_eq!(limit, 1);
        }
        other => panic!("expected physical refusal, got {:?}", other.map(|r| r.bytes())),
    }
}

#[test]
fn tracker_built_from_config() {
    let config = RuntimeConfig {
        no_pointer_gc: true,
        ..RuntimeConfig::unlimited()
    };
    let tracker = AllocationTracker::new(&config);
    assert_eq!(tracker.mode(), ReclaimMode::Inline);
    assert_eq!(tracker.limits().max_bytes, 0);
}
