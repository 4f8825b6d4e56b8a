//! C ABI implemented for generated code - the `np_env` vtable
//!
//! Design: generated translation units never link against this crate. They
//! receive an `np_env*` from `np_module_load` and call back through it to
//! initialize handles, raise errors, register member offsets, attach threads
//! and invoke managed callbacks. The struct layout here must match the
//! prelude the generator emits; `ABI_VERSION` guards that.
//!
//! Errors raised by native code are parked in a thread-local slot and picked
//! up by the Rust caller with [`take_pending_error`].

mod callback;
mod value;

#[cfg(test)]
mod tests;

pub use callback::{register_callback, registered_callbacks, CallbackRegistration, Invocation};
pub use value::{NativeArray, NativeValue};

use crate::error::{Error, Result};
use crate::handle::{AddressHandle, HandleKind, NativeDeallocator, RawHandle};
use crate::logging::log_ffi_call;
use crate::offsets;
use crate::tracker::{self, AllocationTracker};
use core::ffi::{c_char, c_int, c_void, CStr};
use std::cell::{Cell, RefCell};
use std::ffi::CString;
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

/// Layout version shared with the generated prelude
pub const ABI_VERSION: c_int = 1;

pub type DeallocatorFn = unsafe extern "C" fn(*mut c_void);

/// The `np_env` vtable
#[repr(C)]
pub struct NativeEnv {
    pub version: c_int,
    pub init_handle: unsafe extern "C" fn(
        env: *mut NativeEnv,
        obj: *mut c_void,
        ptr: *mut c_void,
        capacity: isize,
        owner: *mut c_void,
        deallocator: Option<DeallocatorFn>,
    ),
    pub new_handle: unsafe extern "C" fn(env: *mut NativeEnv, class_name: *const c_char) -> *mut c_void,
    pub new_string: unsafe extern "C" fn(env: *mut NativeEnv, utf8: *const c_char) -> *mut c_char,
    pub throw_error:
        unsafe extern "C" fn(env: *mut NativeEnv, error_class: *const c_char, message: *const c_char),
    pub has_error: unsafe extern "C" fn(env: *mut NativeEnv) -> c_int,
    pub put_member_offset: unsafe extern "C" fn(
        env: *mut NativeEnv,
        class_name: *const c_char,
        member: *const c_char,
        offset: isize,
    ),
    pub attach_thread: unsafe extern "C" fn(env: *mut NativeEnv) -> c_int,
    pub detach_thread: unsafe extern "C" fn(env: *mut NativeEnv, attached: c_int),
    pub invoke: unsafe extern "C" fn(
        env: *mut NativeEnv,
        obj: *mut c_void,
        method: *const c_char,
        args: *mut NativeValue,
        nargs: c_int,
        ret: *mut NativeValue,
    ) -> c_int,
    pub log: unsafe extern "C" fn(env: *mut NativeEnv, level: c_int, message: *const c_char),
}

static ENV: NativeEnv = NativeEnv {
    version: ABI_VERSION,
    init_handle: np_init_handle,
    new_handle: np_new_handle,
    new_string: np_new_string,
    throw_error: np_throw_error,
    has_error: np_has_error,
    put_member_offset: np_put_member_offset,
    attach_thread: np_attach_thread,
    detach_thread: np_detach_thread,
    invoke: np_invoke,
    log: np_log,
};

/// Pointer handed to `np_module_load`; native code never writes through it
pub fn native_env() -> *mut NativeEnv {
    &ENV as *const NativeEnv as *mut NativeEnv
}

thread_local! {
    static PENDING: RefCell<Option<Error>> = const { RefCell::new(None) };
    static ATTACHED: Cell<u32> = const { Cell::new(0) };
}

/// Park an error for the Rust caller of the current native call
pub fn set_pending_error(err: Error) {
    PENDING.with(|pending| {
        if let Some(previous) = pending.borrow_mut().replace(err) {
            warn!(target: "nativeport::ffi", error = %previous, "pending error overwritten");
        }
    });
}

/// Take the error raised during the last native call on this thread
pub fn take_pending_error() -> Result<()> {
    match PENDING.with(|pending| pending.borrow_mut().take()) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Depth of native-to-managed attachments on the current thread
pub fn attach_depth() -> u32 {
    ATTACHED.with(Cell::get)
}

/// Reclaim a string produced by `np_env::new_string`
///
/// # Safety
///
/// `ptr` must come from `new_string` and not have been reclaimed yet.
pub unsafe fn take_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CString::from_raw(ptr).to_string_lossy().into_owned())
}

/// Reclaim a handle produced by `np_env::new_handle`
///
/// # Safety
///
/// `ptr` must come from `new_handle` and not have been reclaimed yet.
pub unsafe fn take_handle(ptr: *mut c_void) -> Option<AddressHandle> {
    if ptr.is_null() {
        return None;
    }
    Some(*Box::from_raw(ptr as *mut AddressHandle))
}

unsafe fn c_str<'a>(ptr: *const c_char) -> &'a str {
    if ptr.is_null() {
        return "";
    }
    CStr::from_ptr(ptr).to_str().unwrap_or("")
}

unsafe extern "C" fn np_init_handle(
    _env: *mut NativeEnv,
    obj: *mut c_void,
    ptr: *mut c_void,
    capacity: isize,
    owner: *mut c_void,
    deallocator: Option<DeallocatorFn>,
) {
    if let Some(handle) = (obj as *mut AddressHandle).as_mut() {
        init_handle_in(tracker::global(), handle, ptr, capacity, owner, deallocator);
    }
}

/// Point `handle` at native memory and charge it to `tracker`.
///
/// On refused admission the deallocator has already run, the handle is null
/// and the error is pending for the caller.
pub(crate) unsafe fn init_handle_in(
    tracker: &Arc<AllocationTracker>,
    handle: &mut AddressHandle,
    ptr: *mut c_void,
    capacity: isize,
    owner: *mut c_void,
    deallocator: Option<DeallocatorFn>,
) {
    let capacity = capacity.max(0) as usize;
    *handle.raw_mut() = RawHandle {
        address: ptr as usize,
        position: 0,
        limit: capacity,
        capacity,
    };
    if let (Some(function), false, false) = (deallocator, ptr.is_null(), owner.is_null()) {
        let native = NativeDeallocator {
            owner: owner as usize,
            function,
        };
        if let Err(err) = handle.set_deallocator_in(tracker, Box::new(native)) {
            set_pending_error(err);
        }
    }
}

unsafe extern "C" fn np_new_handle(_env: *mut NativeEnv, class_name: *const c_char) -> *mut c_void {
    let kind = HandleKind::from_class_name(c_str(class_name));
    Box::into_raw(Box::new(AddressHandle::null(kind))) as *mut c_void
}

unsafe extern "C" fn np_new_string(_env: *mut NativeEnv, utf8: *const c_char) -> *mut c_char {
    if utf8.is_null() {
        return core::ptr::null_mut();
    }
    CStr::from_ptr(utf8).to_owned().into_raw()
}

unsafe extern "C" fn np_throw_error(
    _env: *mut NativeEnv,
    error_class: *const c_char,
    message: *const c_char,
) {
    let class = c_str(error_class).to_string();
    let message = c_str(message).to_string();
    debug!(target: "nativeport::ffi", class = %class, message = %message, "native error raised");
    set_pending_error(Error::Native { class, message });
}

unsafe extern "C" fn np_has_error(_env: *mut NativeEnv) -> c_int {
    PENDING.with(|pending| pending.borrow().is_some()) as c_int
}

unsafe extern "C" fn np_put_member_offset(
    _env: *mut NativeEnv,
    class_name: *const c_char,
    member: *const c_char,
    offset: isize,
) {
    offsets::put_member_offset(c_str(class_name), c_str(member), offset.max(0) as usize);
}

unsafe extern "C" fn np_attach_thread(_env: *mut NativeEnv) -> c_int {
    let depth = ATTACHED.with(|attached| {
        let depth = attached.get();
        attached.set(depth + 1);
        depth
    });
    if depth == 0 {
        trace!(
            target: "nativeport::ffi",
            thread = ?std::thread::current().id(),
            "native thread attached"
        );
    }
    (depth == 0) as c_int
}

unsafe extern "C" fn np_detach_thread(_env: *mut NativeEnv, attached: c_int) {
    ATTACHED.with(|depth| depth.set(depth.get().saturating_sub(1)));
    if attached != 0 {
        trace!(
            target: "nativeport::ffi",
            thread = ?std::thread::current().id(),
            "native thread detached"
        );
    }
}

unsafe extern "C" fn np_invoke(
    _env: *mut NativeEnv,
    obj: *mut c_void,
    method: *const c_char,
    args: *mut NativeValue,
    nargs: c_int,
    ret: *mut NativeValue,
) -> c_int {
    let method = c_str(method);
    log_ffi_call(method, nargs.max(0) as usize);

    let Some(target) = callback::lookup(obj as usize) else {
        error!(target: "nativeport::ffi", method, key = obj as usize, "no callback registered");
        set_pending_error(Error::Linkage {
            name: method.to_string(),
            reason: "no callback registered for this function object".to_string(),
        });
        return -1;
    };
    let args: &[NativeValue] = if args.is_null() || nargs <= 0 {
        &[]
    } else {
        core::slice::from_raw_parts(args, nargs as usize)
    };
    let invocation = Invocation { method, args };

    // Unwinding must not cross back into native frames
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (*target)(&invocation)));
    match outcome {
        Ok(Ok(value)) => {
            if !ret.is_null() {
                *ret = value;
            }
            0
        }
        Ok(Err(err)) => {
            error!(target: "nativeport::ffi", method, error = %err, "callback failed");
            set_pending_error(err);
            -1
        }
        Err(_) => {
            error!(target: "nativeport::ffi", method, "callback panicked");
            set_pending_error(Error::Native {
                class: "Panic".to_string(),
                message: format!("callback {} panicked", method),
            });
            -1
        }
    }
}

unsafe extern "C" fn np_log(_env: *mut NativeEnv, level: c_int, message: *const c_char) {
    let message = c_str(message);
    match level {
        0 => trace!(target: "nativeport::native", "{}", message),
        1 => debug!(target: "nativeport::native", "{}", message),
        2 => info!(target: "nativeport::native", "{}", message),
        3 => warn!(target: "nativeport::native", "{}", message),
        _ => error!(target: "nativeport::native", "{}", message),
    }
}
