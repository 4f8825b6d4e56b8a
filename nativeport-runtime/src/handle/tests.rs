//! Tests for address handles

use super::*;
use crate::tracker::{Limits, ReclaimMode};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

fn tracker(max_bytes: usize) -> Arc<AllocationTracker> {
    AllocationTracker::with_limits(
        Limits {
            max_bytes,
            max_physical_bytes: 0,
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        },
        ReclaimMode::Deferred,
    )
}

fn hash_of(handle: &AddressHandle) -> u64 {
    let mut hasher = DefaultHasher::new();
    handle.hash(&mut hasher);
    hasher.finish()
}

#[test]
fn allocation_starts_zeroed_with_full_window() {
    let tracker = tracker(0);
    let handle = AddressHandle::allocate_in(&tracker, HandleKind::Int, 10).unwrap();

    assert!(!handle.is_null());
    assert_eq!(handle.position(), 0);
    assert_eq!(handle.limit(), 10);
    assert_eq!(handle.capacity(), 10);
    assert_eq!(tracker.total_bytes(), 40);
    for i in 0..10 {
        assert_eq!(unsafe { handle.get::<i32>(i) }, 0);
    }
}

#[test]
fn capacity_setter_moves_limit() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Int, 10).unwrap();

    handle.set_position(2).set_limit(5).set_capacity(8);
    assert_eq!(handle.limit(), 8);
    assert_eq!(handle.capacity(), 8);
    assert_eq!(handle.position(), 2);
}

#[test]
fn get_and_put_are_relative_to_position() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Int, 8).unwrap();

    unsafe {
        handle.put::<i32>(3, -17);
        handle.set_position(2);
        assert_eq!(handle.get::<i32>(1), -17);
        handle.put::<i32>(0, 99);
        handle.set_position(0);
        assert_eq!(handle.get::<i32>(2), 99);
    }
}

#[test]
fn slices_copy_from_position() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Double, 6).unwrap();

    unsafe {
        handle.set_position(1).put_slice(&[1.5f64, 2.5, 3.5]).unwrap();
        let mut out = [0f64; 4];
        handle.set_position(0).get_slice(&mut out).unwrap();
        assert_eq!(out, [0.0, 1.5, 2.5, 3.5]);
    }
}

#[test]
fn fill_touches_only_the_window() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Int, 8).unwrap();

    unsafe {
        handle.set_position(2).set_limit(5).fill(0xAB).unwrap();
        handle.set_position(0);
        let filled = i32::from_ne_bytes([0xAB; 4]);
        for i in 0..8 {
            let expected = if (2..5).contains(&i) { filled } else { 0 };
            assert_eq!(handle.get::<i32>(i), expected, "element {}", i);
        }
    }
}

#[test]
fn zero_limit_means_one_element() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Short, 4).unwrap();

    unsafe {
        handle.set_position(3).set_limit(0).fill(0xFF).unwrap();
        assert_eq!(handle.as_bytes().unwrap().len(), 2);
        handle.set_position(0);
        assert_eq!(handle.get::<i16>(3), -1);
        assert_eq!(handle.get::<i16>(2), 0);
    }
}

#[test]
fn limit_before_position_is_an_error() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Byte, 8).unwrap();

    handle.set_position(5).set_limit(2);
    let err = unsafe { handle.fill(1) }.unwrap_err();
    assert_eq!(err, Error::LimitBeforePosition { limit: 2, position: 5 });
    assert!(unsafe { handle.as_bytes() }.is_err());
}

#[test]
fn put_handle_measures_in_source_elements() {
    let tracker = tracker(0);
    let mut bytes = AddressHandle::from_buffer_in(&tracker, vec![1u8, 2, 3, 4]).unwrap();
    let mut ints = AddressHandle::allocate_in(&tracker, HandleKind::Int, 2).unwrap();

    unsafe {
        bytes.set_position(1).set_limit(3);
        ints.set_position(1).put_handle(&bytes).unwrap();
        ints.set_position(0);
        let raw = ints.as_bytes_mut().unwrap();
        assert_eq!(raw.len(), 8);
        assert_eq!(&raw[4..8], &[2, 3, 0, 0]);
    }
}

#[test]
fn equality_ignores_kind_against_base() {
    let address = 0x1000;
    let base = AddressHandle::from_address(HandleKind::Base, address);
    let int = AddressHandle::from_address(HandleKind::Int, address);
    let long = AddressHandle::from_address(HandleKind::Long, address);

    assert_eq!(base, int);
    assert_eq!(long, base);
    assert_ne!(int, long);

    let mut shifted = AddressHandle::from_address(HandleKind::Int, address);
    shifted.set_position(1);
    assert_ne!(int, shifted);
    assert_eq!(hash_of(&int), hash_of(&shifted));
}

#[test]
fn null_equals_absent() {
    let null = AddressHandle::null(HandleKind::Base);
    let live = AddressHandle::from_address(HandleKind::Base, 0x10);

    assert!(null.eq_nullable(None));
    assert!(!live.eq_nullable(None));
    assert!(live.eq_nullable(Some(&live.clone())));
}

#[test]
fn explicit_release_through_a_view_nulls_every_view() {
    let tracker = tracker(0);
    let original = AddressHandle::allocate_in(&tracker, HandleKind::Long, 4).unwrap();
    let mut view = AddressHandle::from_handle(&original);
    assert_eq!(original.release_cell_id(), view.release_cell_id());

    view.deallocate();
    assert!(view.is_null());
    assert!(original.is_null());
    assert_eq!(tracker.total_bytes(), 0);

    drop(original);
    assert_eq!(tracker.collect(), 0);
}

#[test]
fn dropping_views_only_releases_after_the_last() {
    let tracker = tracker(0);
    let original = AddressHandle::allocate_in(&tracker, HandleKind::Int, 4).unwrap();
    let view = AddressHandle::from_handle(&original);

    drop(original);
    assert_eq!(tracker.collect(), 0);
    assert!(!view.is_null());
    assert_eq!(tracker.total_bytes(), 16);

    drop(view);
    assert_eq!(tracker.collect(), 1);
    assert_eq!(tracker.total_bytes(), 0);
}

#[test]
fn detaching_uncharges_without_freeing() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Int, 4).unwrap();

    handle.deallocate_with(false);
    assert_eq!(tracker.total_bytes(), 0);
    assert!(!handle.is_null());
    assert!(!handle.is_tracked());

    unsafe {
        handle.put::<i32>(0, 5);
        assert_eq!(handle.get::<i32>(0), 5);
        free(&handle);
    }
    drop(handle);
    assert_eq!(tracker.collect(), 0);
}

#[test]
fn refused_admission_nulls_the_handle() {
    let tracker = tracker(64);
    let _full = AddressHandle::allocate_in(&tracker, HandleKind::Int, 16).unwrap();

    let err = AddressHandle::allocate_in(&tracker, HandleKind::Int, 1).unwrap_err();
    assert_eq!(
        err,
        Error::OutOfMemory {
            ceiling: crate::error::Ceiling::TrackedBytes,
            attempted: 4,
            current: 64,
            limit: 64,
        }
    );
    assert_eq!(tracker.total_bytes(), 64);
}

#[test]
fn replacing_a_deallocator_runs_the_old_one() {
    let tracker = tracker(0);
    let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let mut handle = AddressHandle::from_address(HandleKind::Base, 0x40);
    handle.set_capacity(8);

    let counter = Arc::clone(&runs);
    handle
        .set_deallocator_in(&tracker, Box::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }))
        .unwrap();
    handle.set_deallocator_in(&tracker, Box::new(|| {})).unwrap();

    assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(tracker.total_bytes(), 8);
}

#[test]
fn buffers_are_released_with_the_handle() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::from_buffer_in(&tracker, vec![0.5f32, 1.5, 2.5]).unwrap();

    assert_eq!(handle.kind(), &HandleKind::Float);
    assert_eq!(tracker.total_bytes(), 12);
    assert_eq!(unsafe { handle.get::<f32>(2) }, 2.5);

    handle.deallocate();
    assert_eq!(tracker.total_bytes(), 0);
}

#[test]
fn named_handles_report_registered_layout() {
    offsets::put_member_offset("handle_test.Point", "y", 4);
    offsets::put_member_offset("handle_test.Point", offsets::SIZEOF, 8);

    let point = AddressHandle::null(HandleKind::from_class_name("handle_test.Point"));
    assert_eq!(point.element_size(), 8);
    assert_eq!(point.sizeof(), 8);
    assert_eq!(point.offsetof("y"), Some(4));
    assert_eq!(point.offsetof("z"), None);
}

#[test]
fn debug_lists_the_window() {
    let mut handle = AddressHandle::from_address(HandleKind::Int, 0x20);
    handle.set_position(1).set_limit(3);
    assert_eq!(
        format!("{:?}", handle),
        "IntPointer[address=0x20,position=1,limit=3,capacity=0,release=None]"
    );
}

#[test]
fn libc_helpers_work_at_position() {
    unsafe {
        let mut a = malloc(8);
        let mut b = calloc(8, 1);
        memset(&mut a, 7, 8);
        b.set_position(4);
        memcpy(&mut b, &a, 4);
        b.set_position(0);
        assert_eq!(b.get::<u8>(3), 0);
        assert_eq!(b.get::<u8>(4), 7);
        assert_ne!(memcmp(&a, &b, 8), 0);

        let found = memchr(&b, 7, 8);
        assert_eq!(found.address(), b.address() + 4);

        free(&a);
        free(&b);
    }
}

#[test]
fn strings_carry_a_terminator_outside_the_window() {
    let tracker = tracker(0);
    let handle = AddressHandle::from_string_in(&tracker, "héllo").unwrap();

    assert_eq!(handle.kind(), &HandleKind::Byte);
    assert_eq!(handle.capacity(), 7);
    assert_eq!(handle.limit(), 6);
    unsafe {
        assert_eq!(handle.get::<u8>(6), 0);
        assert_eq!(handle.get_string().unwrap(), "héllo");
    }
}

#[test]
fn get_string_never_reads_past_limit_or_capacity() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Byte, 8).unwrap();

    unsafe {
        handle.put_slice(b"abcdefg").unwrap();
        handle.set_limit(3);
        assert_eq!(handle.get_string().unwrap(), "abc");

        handle.set_limit(0);
        assert_eq!(handle.get_string().unwrap(), "abcdefg");

        handle.put::<u8>(7, b'h');
        assert_eq!(handle.get_string().unwrap(), "abcdefgh");

        handle.set_position(5).set_limit(0);
        assert_eq!(handle.get_string().unwrap(), "fgh");
    }
}

#[test]
fn empty_strings() {
    let tracker = tracker(0);
    let empty = AddressHandle::from_string_in(&tracker, "").unwrap();
    assert_eq!(empty.capacity(), 1);
    assert_eq!(unsafe { empty.get_string() }.unwrap(), "");

    let mut handle = AddressHandle::from_string_in(&tracker, "abcd").unwrap();
    unsafe {
        handle.set_position(2).put_string("").unwrap();
        assert_eq!(handle.limit(), 2);
        assert_eq!(handle.get::<u8>(0), 0);
        assert_eq!(handle.get_string().unwrap(), "");
        assert_eq!(handle.set_position(0).get_string().unwrap(), "ab");
    }
}

#[test]
fn put_string_stops_at_capacity() {
    let tracker = tracker(0);
    let mut handle = AddressHandle::allocate_in(&tracker, HandleKind::Byte, 4).unwrap();

    let err = unsafe { handle.put_string("abcd") }.err();
    assert_eq!(err, Some(Error::CapacityExceeded { needed: 5, capacity: 4 }));
    assert_eq!(unsafe { handle.get::<u8>(0) }, 0);
}

#[test]
fn utf16_strings_round_trip_in_char_handles() {
    let tracker = tracker(0);
    let handle = AddressHandle::from_utf16_string_in(&tracker, "añ😀").unwrap();

    assert_eq!(handle.kind(), &HandleKind::Char);
    assert_eq!(handle.capacity(), 5);
    assert_eq!(handle.limit(), 4);
    unsafe {
        assert_eq!(handle.get::<u16>(4), 0);
        assert_eq!(handle.get_utf16_string().unwrap(), "añ😀");
    }
}

#[test]
fn string_access_needs_a_text_kind() {
    let tracker = tracker(0);
    let ints = AddressHandle::allocate_in(&tracker, HandleKind::Int, 4).unwrap();
    assert_eq!(
        unsafe { ints.get_string() }.unwrap_err(),
        Error::KindMismatch {
            expected: "BytePointer".to_string(),
            found: "IntPointer".to_string(),
        }
    );
}

#[test]
fn pointer_slots_hold_other_handles() {
    let tracker = tracker(0);
    let mut slots = AddressHandle::allocate_in(&tracker, HandleKind::PointerPointer, 2).unwrap();
    let text = AddressHandle::from_string_in(&tracker, "abc").unwrap();

    unsafe {
        slots.put_pointer(1, &text).unwrap();
        assert!(slots.get_pointer(0, HandleKind::Byte).unwrap().is_null());

        let loaded = slots.get_pointer(1, HandleKind::Byte).unwrap();
        assert_eq!(loaded.address(), text.address());
        assert!(!loaded.is_tracked());
        assert_eq!(loaded.get_string().unwrap(), "abc");
    }
}
