use nativeport_runtime::tracker::{Limits, ReclaimMode};
use nativeport_runtime::{AddressHandle, AllocationTracker, HandleKind};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn tracker(max_bytes: usize) -> Arc<AllocationTracker> {
    AllocationTracker::with_limits(
        Limits {
            max_bytes,
            max_physical_bytes: 0,
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        },
        ReclaimMode::Inline,
    )
}

proptest! {
    #[test]
    fn slices_round_trip_at_any_position(
        values in prop::collection::vec(any::<i32>(), 1..64),
        offset in 0usize..16,
    ) {
        let tracker = tracker(0);
        let mut handle =
            AddressHandle::allocate_in(&tracker, HandleKind::Int, values.len() + offset).unwrap();

        let mut out = vec![0i32; values.len()];
        unsafe {
            handle.set_position(offset).put_slice(&values).unwrap();
            handle.get_slice(&mut out).unwrap();
            prop_assert_eq!(handle.set_position(0).get::<i32>(offset), values[0]);
        }
        prop_assert_eq!(out, values);
    }

    #[test]
    fn fill_writes_exactly_the_window(
        len in 1usize..64,
        start in 0usize..64,
        width in 1usize..64,
        byte in 1u8..=255,
    ) {
        let start = start % len;
        let end = (start + width).min(len);
        let tracker = tracker(0);
        let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Short, len).unwrap();

        unsafe {
            handle.set_position(start).set_limit(end).fill(byte).unwrap();
            handle.set_position(0).set_limit(len);
            let bytes = handle.as_bytes().unwrap();
            for (i, b) in bytes.iter().enumerate() {
                let inside = (start * 2..end * 2).contains(&i);
                prop_assert_eq!(*b == byte, inside, "byte {}", i);
            }
        }
    }

    #[test]
    fn total_never_exceeds_ceiling(sizes in prop::collection::vec(1usize..128, 1..40)) {
        let tracker = tracker(1024);
        let mut live = Vec::new();
        for size in sizes {
            match AddressHandle::allocate_in(&tracker, HandleKind::Byte, size) {
                Ok(handle) => live.push(handle),
                Err(_) => {
                    prop_assert!(tracker.total_bytes() + size > 1024);
                    live.clear();
                }
            }
            prop_assert!(tracker.total_bytes() <= 1024);
        }
        drop(live);
        prop_assert_eq!(tracker.total_bytes(), 0);
    }
}
