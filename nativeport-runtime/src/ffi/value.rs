//! C-compatible values exchanged with generated code

use crate::handle::{AddressHandle, RawHandle};
use core::ffi::{c_char, c_void, CStr};

/// One argument or return slot of a callback (`np_value`)
#[repr(C)]
#[derive(Clone, Copy)]
pub union NativeValue {
    pub b: i8,
    pub s: i16,
    pub i: i32,
    pub j: i64,
    pub f: f32,
    pub d: f64,
    pub c: u16,
    pub z: u8,
    pub l: *mut c_void,
}

impl NativeValue {
    #[inline]
    pub const fn null() -> Self {
        Self {
            l: core::ptr::null_mut(),
        }
    }

    #[inline]
    pub const fn int(value: i32) -> Self {
        Self { i: value }
    }

    #[inline]
    pub const fn long(value: i64) -> Self {
        Self { j: value }
    }

    #[inline]
    pub const fn double(value: f64) -> Self {
        Self { d: value }
    }

    #[inline]
    pub const fn boolean(value: bool) -> Self {
        Self { z: value as u8 }
    }

    #[inline]
    pub const fn pointer(value: *mut c_void) -> Self {
        Self { l: value }
    }

    /// Read the slot as a C string produced by `np_env::new_string`
    ///
    /// # Safety
    ///
    /// The slot must hold a pointer from `new_string` that was not yet taken.
    pub unsafe fn take_string(self) -> Option<String> {
        super::take_string(self.l as *mut c_char)
    }

    /// Read the slot as a handle produced by `np_env::new_handle`
    ///
    /// # Safety
    ///
    /// The slot must hold a pointer from `new_handle` that was not yet taken.
    pub unsafe fn take_handle(self) -> Option<AddressHandle> {
        super::take_handle(self.l)
    }

    /// Borrow the slot as a handle living on the trampoline's stack.
    ///
    /// Pointer arguments of callbacks are passed this way; a new address
    /// written here is copied back for pointer-to-pointer parameters.
    ///
    /// # Safety
    ///
    /// The slot must hold a pointer to an `np_handle` that outlives `'a`.
    pub unsafe fn as_raw_handle<'a>(self) -> Option<&'a mut RawHandle> {
        (self.l as *mut RawHandle).as_mut()
    }

    /// Borrow the slot as a C string without taking ownership
    ///
    /// # Safety
    ///
    /// The slot must hold a valid NUL-terminated string or null.
    pub unsafe fn as_str<'a>(self) -> Option<&'a str> {
        let ptr = self.l as *const c_char;
        if ptr.is_null() {
            return None;
        }
        CStr::from_ptr(ptr).to_str().ok()
    }
}

impl Default for NativeValue {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl core::fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "NativeValue {{ ... }}")
    }
}

/// Primitive array or buffer argument (`np_array`)
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct NativeArray {
    pub data: *mut c_void,
    pub length: isize,
}

impl NativeArray {
    pub fn from_slice<T>(slice: &mut [T]) -> Self {
        Self {
            data: slice.as_mut_ptr() as *mut c_void,
            length: slice.len() as isize,
        }
    }

    pub const fn empty() -> Self {
        Self {
            data: core::ptr::null_mut(),
            length: 0,
        }
    }
}
