//! Tests for the np_env vtable, driven the way generated code drives it

use super::*;
use std::ffi::CString;
use std::sync::atomic::{AtomicUsize, Ordering};

static FREED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn free_ints(ptr: *mut c_void) {
    drop(Box::from_raw(ptr as *mut [i32; 4]));
    FREED.fetch_add(1, Ordering::SeqCst);
}

static REFUSED: AtomicUsize = AtomicUsize::new(0);

unsafe extern "C" fn free_refused(ptr: *mut c_void) {
    REFUSED.store(ptr as usize, Ordering::SeqCst);
    drop(Box::from_raw(ptr as *mut u64));
}

fn env() -> &'static NativeEnv {
    unsafe { &*native_env() }
}

#[test]
fn init_handle_installs_native_deallocator() {
    let env = env();
    let ints = Box::into_raw(Box::new([1i32, 2, 3, 4])) as *mut c_void;
    let mut handle = AddressHandle::null(HandleKind::Int);

    unsafe {
        (env.init_handle)(native_env(), handle.as_native(), ints, 4, ints, Some(free_ints));
    }
    assert_eq!(handle.address(), ints as usize);
    assert_eq!(handle.capacity(), 4);
    assert_eq!(handle.limit(), 4);
    assert!(handle.is_tracked());
    assert_eq!(unsafe { handle.get::<i32>(2) }, 3);

    let before = FREED.load(Ordering::SeqCst);
    handle.deallocate();
    assert_eq!(FREED.load(Ordering::SeqCst), before + 1);
    assert!(handle.is_null());
}

#[test]
fn init_handle_without_owner_does_not_track() {
    let env = env();
    let mut value = 7i64;
    let mut handle = AddressHandle::null(HandleKind::Long);

    unsafe {
        (env.init_handle)(
            native_env(),
            handle.as_native(),
            &mut value as *mut i64 as *mut c_void,
            1,
            core::ptr::null_mut(),
            Some(free_ints),
        );
    }
    assert!(!handle.is_tracked());
    assert_eq!(unsafe { handle.get::<i64>(0) }, 7);
}

#[test]
fn refused_admission_releases_native_object_and_sets_pending_error() {
    use crate::tracker::{Limits, ReclaimMode};
    use std::time::Duration;

    let refusing = AllocationTracker::with_limits(
        Limits {
            max_bytes: 1,
            max_physical_bytes: 0,
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        },
        ReclaimMode::Inline,
    );
    let object = Box::into_raw(Box::new(0x1122_3344_5566_7788u64)) as *mut c_void;
    let mut handle = AddressHandle::null(HandleKind::Long);

    assert!(take_pending_error().is_ok());
    unsafe {
        init_handle_in(&refusing, &mut handle, object, 1, object, Some(free_refused));
    }

    assert_eq!(REFUSED.load(Ordering::SeqCst), object as usize);
    assert!(handle.is_null());
    assert!(!handle.is_tracked());
    assert_eq!(refusing.total_bytes(), 0);
    assert!(matches!(
        take_pending_error(),
        Err(Error::OutOfMemory { attempted: 8, limit: 1, .. })
    ));
}

#[test]
fn thrown_errors_reach_the_caller() {
    let env = env();
    let class = CString::new("RuntimeException").unwrap();
    let message = CString::new("vector index out of range").unwrap();

    assert!(take_pending_error().is_ok());
    unsafe {
        (env.throw_error)(native_env(), class.as_ptr(), message.as_ptr());
        assert_eq!((env.has_error)(native_env()), 1);
    }
    let err = take_pending_error().unwrap_err();
    assert_eq!(err.to_string(), "RuntimeException: vector index out of range");
    assert_eq!(unsafe { (env.has_error)(native_env()) }, 0);
}

#[test]
fn strings_and_handles_round_trip_through_env() {
    let env = env();
    let text = CString::new("héllo").unwrap();
    let class = CString::new("DoublePointer").unwrap();

    unsafe {
        let copy = (env.new_string)(native_env(), text.as_ptr());
        assert_eq!(take_string(copy).as_deref(), Some("héllo"));
        assert!((env.new_string)(native_env(), core::ptr::null()).is_null());

        let raw = (env.new_handle)(native_env(), class.as_ptr());
        let handle = take_handle(raw).unwrap();
        assert_eq!(handle.kind(), &HandleKind::Double);
        assert!(handle.is_null());
    }
}

#[test]
fn member_offsets_are_registered() {
    let env = env();
    let class = CString::new("ffi_test.Rect").unwrap();
    let member = CString::new("height").unwrap();

    unsafe {
        (env.put_member_offset)(native_env(), class.as_ptr(), member.as_ptr(), 12);
    }
    assert_eq!(offsets::offsetof("ffi_test.Rect", "height"), Some(12));
}

#[test]
fn attach_reports_outermost_only() {
    let env = env();
    std::thread::spawn(move || unsafe {
        assert_eq!(attach_depth(), 0);
        let outer = (env.attach_thread)(native_env());
        let inner = (env.attach_thread)(native_env());
        assert_eq!((outer, inner), (1, 0));
        assert_eq!(attach_depth(), 2);
        (env.detach_thread)(native_env(), inner);
        (env.detach_thread)(native_env(), outer);
        assert_eq!(attach_depth(), 0);
    })
    .join()
    .unwrap();
}

#[test]
fn invoke_dispatches_to_registered_callback() {
    let env = env();
    let registration = register_callback(|call: &Invocation<'_>| {
        assert_eq!(call.method, "call");
        let sum: i32 = call.args.iter().map(|a| unsafe { a.i }).sum();
        Ok(NativeValue::int(sum))
    });
    let method = CString::new("call").unwrap();
    let mut args = [NativeValue::int(40), NativeValue::int(2)];
    let mut ret = NativeValue::default();

    let status = unsafe {
        (env.invoke)(
            native_env(),
            registration.key(),
            method.as_ptr(),
            args.as_mut_ptr(),
            2,
            &mut ret,
        )
    };
    assert_eq!(status, 0);
    assert_eq!(unsafe { ret.i }, 42);
}

#[test]
fn invoke_reports_missing_and_panicking_targets() {
    let env = env();
    let method = CString::new("apply").unwrap();
    let mut ret = NativeValue::default();

    let key = {
        let registration = register_callback(|_| Ok(NativeValue::null()));
        registration.key()
    };
    let status = unsafe {
        (env.invoke)(native_env(), key, method.as_ptr(), core::ptr::null_mut(), 0, &mut ret)
    };
    assert_eq!(status, -1);
    assert!(matches!(take_pending_error(), Err(Error::Linkage { .. })));

    let panicking = register_callback(|_| panic!("boom"));
    let status = unsafe {
        (env.invoke)(
            native_env(),
            panicking.key(),
            method.as_ptr(),
            core::ptr::null_mut(),
            0,
            &mut ret,
        )
    };
    assert_eq!(status, -1);
    assert!(matches!(take_pending_error(), Err(Error::Native { .. })));
}
