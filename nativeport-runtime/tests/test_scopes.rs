use nativeport_runtime::tracker::{Limits, ReclaimMode};
use nativeport_runtime::{AddressHandle, AllocationTracker, Error, HandleKind, Scope};
use std::sync::Arc;
use std::time::Duration;

fn tracker() -> Arc<AllocationTracker> {
    AllocationTracker::with_limits(
        Limits {
            max_bytes: 0,
            max_physical_bytes: 0,
            max_retries: 0,
            retry_delay: Duration::from_millis(1),
        },
        ReclaimMode::Deferred,
    )
}

#[test]
fn test_scope_releases_members_on_close() {
    let tracker = tracker();
    let scope = Scope::open();
    let ints = AddressHandle::allocate_in(&tracker, HandleKind::Int, 16).unwrap();
    let bytes = AddressHandle::allocate_in(&tracker, HandleKind::Byte, 16).unwrap();
    assert_eq!(scope.len(), 2);
    assert_eq!(tracker.total_bytes(), 80);

    drop(scope);
    assert!(ints.is_null());
    assert!(bytes.is_null());
    assert_eq!(tracker.total_bytes(), 0);
}

#[test]
fn test_detached_handle_outlives_scope() {
    let tracker = tracker();
    let mut scope = Scope::open();
    let kept = AddressHandle::allocate_in(&tracker, HandleKind::Double, 4).unwrap();
    let released = AddressHandle::allocate_in(&tracker, HandleKind::Double, 4).unwrap();

    scope.detach(&kept);
    scope.close().unwrap();

    assert!(!kept.is_null());
    assert!(released.is_null());
    assert_eq!(tracker.total_bytes(), 32);
}

#[test]
fn test_nested_scopes_release_innermost_first() {
    let tracker = tracker();
    let depth = Scope::inner_depth();

    let mut outer = Scope::open();
    let a = AddressHandle::allocate_in(&tracker, HandleKind::Long, 2).unwrap();
    {
        let inner = Scope::open();
        assert_eq!(Scope::inner_depth(), depth + 2);
        let b = AddressHandle::allocate_in(&tracker, HandleKind::Long, 2).unwrap();
        assert_eq!(outer.len(), 1);
        drop(inner);
        assert!(b.is_null());
        assert!(!a.is_null());
    }
    outer.close().unwrap();
    assert!(a.is_null());
    assert_eq!(Scope::inner_depth(), depth);
}

#[test]
fn test_closing_outer_scope_first_is_rejected() {
    let tracker = tracker();
    let mut outer = Scope::open();
    let mut inner = Scope::open();
    let handle = AddressHandle::allocate_in(&tracker, HandleKind::Int, 1).unwrap();

    let err = outer.close().unwrap_err();
    assert_eq!(
        err,
        Error::ScopeOrder {
            closing: outer.id(),
            innermost: inner.id(),
        }
    );
    assert!(!handle.is_null());

    inner.close().unwrap();
    assert!(handle.is_null());
    outer.close().unwrap();
}

#[test]
fn test_dropping_outer_scope_first_releases_only_its_members() {
    let tracker = tracker();
    let outer = Scope::open();
    let a = AddressHandle::allocate_in(&tracker, HandleKind::Int, 1).unwrap();
    let mut inner = Scope::open();
    let b = AddressHandle::allocate_in(&tracker, HandleKind::Int, 1).unwrap();

    drop(outer);
    assert!(a.is_null());
    assert!(!b.is_null());

    inner.close().unwrap();
    assert!(b.is_null());
}

#[test]
fn test_extended_scope_hands_members_to_parent() {
    let tracker = tracker();
    let outer = Scope::open();
    let handle = {
        let inner = Scope::open();
        let handle = AddressHandle::allocate_in(&tracker, HandleKind::Float, 8).unwrap();
        inner.extend();
        handle
    };
    assert!(!handle.is_null());
    assert_eq!(outer.len(), 1);

    drop(outer);
    assert!(handle.is_null());
    assert_eq!(tracker.total_bytes(), 0);
}

#[test]
fn test_extended_outermost_scope_leaves_handles_alive() {
    let tracker = tracker();
    let scope = Scope::open();
    let handle = AddressHandle::allocate_in(&tracker, HandleKind::Short, 8).unwrap();
    scope.extend();
    drop(scope);

    assert!(!handle.is_null());
    drop(handle);
    assert_eq!(tracker.collect(), 1);
    assert_eq!(tracker.total_bytes(), 0);
}

#[test]
fn test_non_owning_scope_releases_only_attached() {
    let tracker = tracker();
    let scope = Scope::open_non_owning();
    let loose = AddressHandle::allocate_in(&tracker, HandleKind::Int, 2).unwrap();
    let attached = AddressHandle::allocate_in(&tracker, HandleKind::Int, 2).unwrap();
    assert!(scope.is_empty());

    scope.attach(&attached).unwrap();
    drop(scope);

    assert!(!loose.is_null());
    assert!(attached.is_null());
}

#[test]
fn test_kind_restricted_scope() {
    let tracker = tracker();
    let scope = Scope::for_kinds(&[HandleKind::Int]);
    let ints = AddressHandle::allocate_in(&tracker, HandleKind::Int, 2).unwrap();
    let longs = AddressHandle::allocate_in(&tracker, HandleKind::Long, 2).unwrap();
    assert_eq!(scope.len(), 1);

    let err = scope.attach(&longs).err();
    assert_eq!(
        err,
        Some(Error::KindNotAllowed {
            kind: "LongPointer".to_string()
        })
    );

    drop(scope);
    assert!(ints.is_null());
    assert!(!longs.is_null());
}

#[test]
fn test_deallocate_keeps_scope_open() {
    let tracker = tracker();
    let scope = Scope::open();
    let first = AddressHandle::allocate_in(&tracker, HandleKind::Byte, 4).unwrap();

    scope.deallocate();
    assert!(first.is_null());
    assert!(scope.is_empty());

    let second = AddressHandle::allocate_in(&tracker, HandleKind::Byte, 4).unwrap();
    assert_eq!(scope.len(), 1);
    drop(scope);
    assert!(second.is_null());
}

#[test]
fn test_scopes_are_per_thread() {
    let tracker = tracker();
    let scope = Scope::open();

    let handle = std::thread::spawn({
        let tracker = Arc::clone(&tracker);
        move || {
            assert_eq!(Scope::inner_depth(), 0);
            AddressHandle::allocate_in(&tracker, HandleKind::Int, 1).unwrap()
        }
    })
    .join()
    .unwrap();

    assert!(scope.is_empty());
    assert!(!handle.is_null());
}
