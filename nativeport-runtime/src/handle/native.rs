//! C library memory routines on handles
//!
//! Each routine works at the handle's current position, like the generated
//! code does for every handle argument. Handles returned here carry no
//! deallocator: the caller pairs `malloc`/`calloc`/`realloc` with `free`.

use super::{AddressHandle, HandleKind};
use core::ffi::c_void;

/// # Safety
///
/// The returned memory is uninitialized and must be released with [`free`].
pub unsafe fn malloc(size: usize) -> AddressHandle {
    AddressHandle::from_address(HandleKind::Base, libc::malloc(size) as usize)
}

/// # Safety
///
/// The returned memory must be released with [`free`].
pub unsafe fn calloc(count: usize, size: usize) -> AddressHandle {
    AddressHandle::from_address(HandleKind::Base, libc::calloc(count, size) as usize)
}

/// # Safety
///
/// `handle` must hold memory from this module's allocators and no deallocator.
pub unsafe fn realloc(handle: &AddressHandle, size: usize) -> AddressHandle {
    let address = libc::realloc(handle.cursor() as *mut c_void, size) as usize;
    AddressHandle::from_address(handle.kind().clone(), address)
}

/// # Safety
///
/// `handle` must hold memory from this module's allocators and no deallocator.
pub unsafe fn free(handle: &AddressHandle) {
    libc::free(handle.cursor() as *mut c_void)
}

/// # Safety
///
/// `size` bytes from the handle position must be readable.
pub unsafe fn memchr(handle: &AddressHandle, byte: u8, size: usize) -> AddressHandle {
    let found = libc::memchr(handle.cursor() as *const c_void, byte as i32, size) as usize;
    AddressHandle::from_address(HandleKind::Base, found)
}

/// # Safety
///
/// `size` bytes from both positions must be readable.
pub unsafe fn memcmp(a: &AddressHandle, b: &AddressHandle, size: usize) -> i32 {
    libc::memcmp(a.cursor() as *const c_void, b.cursor() as *const c_void, size)
}

/// # Safety
///
/// Ranges must be valid and must not overlap.
pub unsafe fn memcpy<'a>(dst: &'a mut AddressHandle, src: &AddressHandle, size: usize) -> &'a mut AddressHandle {
    libc::memcpy(dst.cursor() as *mut c_void, src.cursor() as *const c_void, size);
    dst
}

/// # Safety
///
/// Ranges must be valid; they may overlap.
pub unsafe fn memmove<'a>(dst: &'a mut AddressHandle, src: &AddressHandle, size: usize) -> &'a mut AddressHandle {
    libc::memmove(dst.cursor() as *mut c_void, src.cursor() as *const c_void, size);
    dst
}

/// # Safety
///
/// `size` bytes from the handle position must be writable.
pub unsafe fn memset(dst: &mut AddressHandle, byte: u8, size: usize) -> &mut AddressHandle {
    libc::memset(dst.cursor() as *mut c_void, byte as i32, size);
    dst
}
